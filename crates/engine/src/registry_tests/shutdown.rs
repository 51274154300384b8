// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::RegistryError;
use xbar_storage::ContextStore;

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.quiesce().await;

    f.registry.shutdown().await;
    assert!(f.registry.is_draining());

    let delivered = f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    assert!(!delivered);
    assert!(f
        .listener
        .drops_for("call-1")
        .iter()
        .any(|(_, reason)| *reason == DropReason::Draining));

    let err = f
        .registry
        .register(call_machine("call-2", &f.table))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Draining));
}

#[tokio::test]
async fn shutdown_discards_armed_timeouts() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;

    f.registry.shutdown().await;

    f.clock.advance(Duration::from_secs(60));
    assert_eq!(f.registry.poll_timeouts(), 0);
}

#[tokio::test]
async fn shutdown_drains_live_set() {
    let f = fixture(false);
    for n in 0..4 {
        f.registry
            .register(call_machine(&format!("call-{n}"), &f.table))
            .await
            .unwrap();
    }
    f.registry.quiesce().await;
    assert_eq!(f.registry.live_count(), 4);

    f.registry.shutdown().await;
    assert_eq!(f.registry.live_count(), 0);
}

#[tokio::test]
async fn undelivered_events_are_reported_at_shutdown() {
    // A zero concurrency budget parks every drain task, so queued
    // events deterministically survive until the drain deadline.
    let store = Arc::new(MemoryStore::new());
    let config = RegistryConfig::default()
        .max_concurrent_machines(0)
        .shutdown_timeout(Duration::from_millis(50));
    let registry: CallRegistry = Registry::new(Arc::clone(&store), FakeClock::new(), config);
    let listener = Arc::new(Recording::default());
    registry.add_listener(listener.clone());

    let table = call_table(false);
    registry.register(call_machine("call-1", &table)).await.unwrap();
    for _ in 0..3 {
        assert!(registry.send_event(&id("call-1"), Box::new(IncomingCall)).await);
    }

    registry.shutdown().await;

    let drops = listener.drops_for("call-1");
    assert_eq!(drops.len(), 3);
    assert!(drops
        .iter()
        .all(|(event, reason)| event == "INCOMING_CALL" && *reason == DropReason::Undelivered));
    assert_eq!(registry.metrics().dropped, 3);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let f = fixture(false);
    f.registry.shutdown().await;
    f.registry.shutdown().await;
    assert!(f.registry.is_draining());
}

#[tokio::test]
async fn completed_work_survives_shutdown() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;
    f.registry.shutdown().await;

    // The last committed state is still on disk for the next process
    let saved: TestRecord = f.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(saved.current_state, "RINGING");
}
