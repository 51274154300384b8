//! Scenarios: stay handlers mutate context in place; unmatched events
//! are accepted and ignored.

use crate::prelude::*;
use std::time::Duration;
use xbar_storage::ContextStore;

#[tokio::test]
async fn session_progress_counts_in_place() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-1", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    for _ in 0..3 {
        d.registry
            .send_event(&id("call-1"), Box::new(SessionProgress))
            .await;
    }
    d.registry.quiesce().await;

    // Still ringing, three counted
    assert_eq!(d.registry.current_state(&id("call-1")).unwrap(), "RINGING");
    let record = d.registry.persistent_snapshot(&id("call-1")).unwrap();
    assert_eq!(record.ring_count, 3);

    // Three listener events with oldState == newState == RINGING
    let stays: Vec<_> = d
        .log
        .transitions("call-1")
        .into_iter()
        .filter(|(old, new)| old.as_deref() == Some("RINGING") && new == "RINGING")
        .collect();
    assert_eq!(stays.len(), 3);

    // The mutated context is durable
    let saved: CallDetail = d.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(saved.ring_count, 3);
}

#[tokio::test]
async fn unmatched_event_is_ignored_without_side_effects() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-2", &d.table))
        .await
        .unwrap();

    // ANSWER in IDLE: accepted for dispatch, ignored by the machine
    let delivered = d.registry.send_event(&id("call-2"), Box::new(Answer)).await;
    assert!(delivered);
    d.registry.quiesce().await;

    assert_eq!(d.registry.current_state(&id("call-2")).unwrap(), "IDLE");
    assert_eq!(d.registry.metrics().ignored, 1);
    // No listener event beyond the initial transition
    assert_eq!(d.log.transitions("call-2").len(), 1);
}

#[tokio::test]
async fn progress_in_connected_is_ignored() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-3", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-3"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-3"), Box::new(Answer)).await;
    d.registry
        .send_event(&id("call-3"), Box::new(SessionProgress))
        .await;
    d.registry.quiesce().await;

    let record = d.registry.persistent_snapshot(&id("call-3")).unwrap();
    assert_eq!(record.ring_count, 0, "progress only counts while ringing");
    assert_eq!(d.registry.current_state(&id("call-3")).unwrap(), "CONNECTED");
}
