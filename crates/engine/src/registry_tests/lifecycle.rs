// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{CreateOutcome, RegistryError};
use xbar_storage::ContextStore;

#[tokio::test]
async fn register_starts_machine_in_initial_state() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    assert_eq!(f.registry.live_count(), 1);
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert!(f.listener.contains(&Recorded::Create("call-1".into())));
    assert_eq!(
        f.listener.transitions_for("call-1"),
        [(None, "IDLE".to_string())]
    );

    // The initial state is durable immediately
    let saved: TestRecord = f.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(saved.current_state, "IDLE");
}

#[tokio::test]
async fn double_register_fails_second_call() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    let err = f
        .registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered(_)));

    // First machine unaffected
    assert_eq!(f.registry.live_count(), 1);
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
}

#[tokio::test]
async fn simple_call_flow_runs_to_completion() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    assert!(f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await);
    assert!(f.registry.send_event(&id("call-1"), Box::new(Answer)).await);
    assert!(
        f.registry
            .send_event(&id("call-1"), Box::new(Hangup::normal()))
            .await
    );
    f.registry.quiesce().await;

    // Evicted with a complete record
    assert!(!f.registry.contains(&id("call-1")));
    assert!(
        ContextStore::<TestRecord>::is_complete(f.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );
    assert!(f.listener.contains(&Recorded::Remove("call-1".into())));

    // Transitions observed in order
    assert_eq!(
        f.listener.transitions_for("call-1"),
        [
            (None, "IDLE".to_string()),
            (Some("IDLE".to_string()), "RINGING".to_string()),
            (Some("RINGING".to_string()), "CONNECTED".to_string()),
            (Some("CONNECTED".to_string()), "HUNGUP".to_string()),
        ]
    );
}

#[tokio::test]
async fn send_after_final_returns_false() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry
        .send_event(&id("call-1"), Box::new(Hangup::normal()))
        .await;
    f.registry.quiesce().await;
    assert!(!f.registry.contains(&id("call-1")));

    let delivered = f.registry.send_event(&id("call-1"), Box::new(Answer)).await;
    assert!(!delivered);
    assert!(f
        .listener
        .drops_for("call-1")
        .iter()
        .any(|(event, reason)| event == "ANSWER" && *reason == DropReason::NoSuchMachine));
}

#[tokio::test]
async fn unmatched_event_is_accepted_then_ignored() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    // ANSWER has no transition from IDLE
    assert!(f.registry.send_event(&id("call-1"), Box::new(Answer)).await);
    f.registry.quiesce().await;

    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert_eq!(f.registry.metrics().ignored, 1);
    // Only the initial transition was ever observed
    assert_eq!(f.listener.transitions_for("call-1").len(), 1);
}

#[tokio::test]
async fn stay_handler_counts_without_leaving_state() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    for _ in 0..3 {
        f.registry
            .send_event(&id("call-1"), Box::new(SessionProgress))
            .await;
    }
    f.registry.quiesce().await;

    let record = f.registry.persistent_snapshot(&id("call-1")).unwrap();
    assert_eq!(record.ring_count, 3);
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "RINGING");

    let stays: Vec<_> = f
        .listener
        .transitions_for("call-1")
        .into_iter()
        .filter(|(old, new)| old.as_deref() == Some("RINGING") && new == "RINGING")
        .collect();
    assert_eq!(stays.len(), 3);

    // Stays persist the mutated context
    let saved: TestRecord = f.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(saved.ring_count, 3);
}

#[tokio::test]
async fn create_or_get_returns_existing_instance() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    let table = Arc::clone(&f.table);
    let outcome = f
        .registry
        .create_or_get(&id("call-1"), || call_machine("call-1", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Existing);
    assert_eq!(f.registry.live_count(), 1);
}

#[tokio::test]
async fn create_or_get_creates_when_absent() {
    let f = fixture(false);
    let table = Arc::clone(&f.table);
    let outcome = f
        .registry
        .create_or_get(&id("call-9"), || call_machine("call-9", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Created);
    assert!(f.listener.contains(&Recorded::Create("call-9".into())));
    assert_eq!(f.registry.current_state(&id("call-9")).unwrap(), "IDLE");
}

#[tokio::test]
async fn concurrent_create_or_get_converges_on_one_instance() {
    let f = fixture(false);
    let mut joins = Vec::new();
    for _ in 0..8 {
        let registry = f.registry.clone();
        let table = Arc::clone(&f.table);
        joins.push(tokio::spawn(async move {
            registry
                .create_or_get(&id("call-1"), || call_machine("call-1", &table))
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    for join in joins {
        if join.await.unwrap() == CreateOutcome::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1, "exactly one caller creates");
    assert_eq!(f.registry.live_count(), 1);
}

#[tokio::test]
async fn remove_machine_cancels_and_notifies() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;

    assert!(f.registry.remove_machine(&id("call-1")));
    assert!(!f.registry.contains(&id("call-1")));
    assert!(f.listener.contains(&Recorded::Remove("call-1".into())));

    // The RINGING timeout is disarmed
    f.clock.advance(Duration::from_secs(31));
    assert_eq!(f.registry.poll_timeouts(), 0);

    // Persistence is preserved (record not complete)
    assert!(
        ContextStore::<TestRecord>::exists(f.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );
    assert!(
        !ContextStore::<TestRecord>::is_complete(f.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );

    assert!(!f.registry.remove_machine(&id("call-1")), "second remove is a no-op");
}

#[tokio::test]
async fn send_to_unknown_machine_returns_false() {
    let f = fixture(false);
    let delivered = f.registry.send_event(&id("ghost"), Box::new(Answer)).await;
    assert!(!delivered);
    assert!(f
        .listener
        .drops_for("ghost")
        .iter()
        .any(|(_, reason)| *reason == DropReason::NoSuchMachine));
    assert_eq!(f.registry.metrics().dropped, 1);
}

#[tokio::test]
async fn unregistered_event_type_is_dropped() {
    #[derive(Debug)]
    struct Mystery;

    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    let delivered = f.registry.send_event(&id("call-1"), Box::new(Mystery)).await;
    assert!(!delivered);
    assert!(f
        .listener
        .drops_for("call-1")
        .iter()
        .any(|(_, reason)| *reason == DropReason::UnknownEventType));
}
