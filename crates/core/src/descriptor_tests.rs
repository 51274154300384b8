// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::builder::TableBuilder;
use crate::test_support::{register_call_events, Answer, Hangup, IncomingCall, TestRecord, TestScratch};

fn call_table() -> DescriptorTable<TestRecord, TestScratch> {
    register_call_events();
    TableBuilder::new("call")
        .initial("IDLE")
        .state("IDLE")
        .on::<IncomingCall>()
        .go("RINGING")
        .end()
        .state("RINGING")
        .on::<Answer>()
        .go("CONNECTED")
        .on::<Hangup>()
        .go("HUNGUP")
        .timeout(Duration::from_secs(30), "IDLE")
        .end()
        .state("CONNECTED")
        .on::<Hangup>()
        .go("HUNGUP")
        .end()
        .state("HUNGUP")
        .final_state()
        .end()
        .build()
        .unwrap()
}

#[test]
fn table_exposes_states_in_declaration_order() {
    let table = call_table();
    assert_eq!(table.kind(), "call");
    assert_eq!(table.initial(), "IDLE");
    assert_eq!(table.len(), 4);

    let names: Vec<&str> = table.states().map(|s| s.name()).collect();
    assert_eq!(names, ["IDLE", "RINGING", "CONNECTED", "HUNGUP"]);
}

#[test]
fn transition_lookup_resolves_by_event_name() {
    let table = call_table();
    let ringing = table.state("RINGING").unwrap();

    assert!(matches!(
        ringing.transition("ANSWER"),
        Some(Transition::Go(target)) if target == "CONNECTED"
    ));
    assert!(ringing.transition("SESSION_PROGRESS").is_none());
}

#[test]
fn timeout_configuration_is_preserved() {
    let table = call_table();
    let timeout = table.state("RINGING").unwrap().timeout().unwrap();
    assert_eq!(timeout.duration, Duration::from_secs(30));
    assert_eq!(timeout.target, "IDLE");

    assert!(table.state("IDLE").unwrap().timeout().is_none());
}

#[test]
fn final_marker_is_exclusive_to_hungup() {
    let table = call_table();
    assert!(table.state("HUNGUP").unwrap().is_final());
    assert!(!table.state("HUNGUP").unwrap().is_offline());
    assert!(!table.state("IDLE").unwrap().is_final());
}

#[test]
fn action_error_from_strings() {
    let err = ActionError::from("line dropped");
    assert_eq!(err.to_string(), "line dropped");

    let err: ActionError = String::from("codec mismatch").into();
    assert_eq!(err.to_string(), "codec mismatch");
}
