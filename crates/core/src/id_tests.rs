// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

#[test]
fn machine_id_compares_with_str() {
    let id = MachineId::new("call-42");
    assert_eq!(id, "call-42");
    assert_eq!(id.as_str(), "call-42");
    assert_eq!(id.to_string(), "call-42");
}

#[test]
fn machine_id_short_truncates() {
    let id = MachineId::new("0123456789abcdef");
    assert_eq!(id.short(8), "01234567");
    assert_eq!(MachineId::new("ab").short(8), "ab");
}

#[test]
fn machine_id_borrows_as_map_key() {
    let mut map: HashMap<MachineId, u32> = HashMap::new();
    map.insert(MachineId::new("sms-1"), 7);
    assert_eq!(map.get("sms-1"), Some(&7));
}

#[test]
fn uuid_gen_produces_unique_ids() {
    let gen = UuidIdGen;
    let a = gen.next();
    let b = gen.next();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn sequential_gen_counts_up() {
    let gen = SequentialIdGen::new("call");
    assert_eq!(gen.next(), "call-1");
    assert_eq!(gen.next(), "call-2");

    // Clones share the counter
    let clone = gen.clone();
    assert_eq!(clone.next(), "call-3");
    assert_eq!(gen.next(), "call-4");
}
