// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn header_reads_well_known_fields() {
    let raw = r#"{
        "current_state": "CONNECTED",
        "last_state_change": 1234,
        "complete": false,
        "caller": "+15550100",
        "ring_count": 2
    }"#;
    let header = RecordHeader::parse(raw).unwrap();
    assert_eq!(header.current_state, "CONNECTED");
    assert_eq!(header.last_state_change, 1234);
    assert!(!header.complete);
}

#[test]
fn header_defaults_optional_fields() {
    let header = RecordHeader::parse(r#"{"current_state": "IDLE"}"#).unwrap();
    assert_eq!(header.last_state_change, 0);
    assert!(!header.complete);
}

#[parameterized(
    missing_state = { r#"{"complete": true}"# },
    not_an_object = { r#"[1, 2, 3]"# },
    garbage = { "not json" },
)]
fn header_rejects_malformed_records(raw: &str) {
    assert!(RecordHeader::parse(raw).is_err());
}
