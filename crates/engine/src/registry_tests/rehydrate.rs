// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{CreateOutcome, RegistryError};
use xbar_storage::ContextStore;

/// Drive a call into the offline CONNECTED state and verify eviction.
async fn park_call(f: &Fixture, call: &str) {
    f.registry
        .register(call_machine(call, &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id(call), Box::new(IncomingCall)).await;
    f.registry.send_event(&id(call), Box::new(Answer)).await;
    f.registry.quiesce().await;

    assert!(!f.registry.contains(&id(call)), "offline entry evicts");
    assert!(f.listener.contains(&Recorded::Remove(call.to_string())));
    assert!(
        ContextStore::<TestRecord>::exists(f.store.as_ref(), &id(call))
            .await
            .unwrap()
    );
    assert!(
        !ContextStore::<TestRecord>::is_complete(f.store.as_ref(), &id(call))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn offline_machine_rehydrates_through_create_or_get() {
    let f = fixture(true);
    park_call(&f, "call-1").await;

    let table = Arc::clone(&f.table);
    let outcome = f
        .registry
        .create_or_get(&id("call-1"), || call_machine("call-1", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Rehydrated);
    assert!(f.listener.contains(&Recorded::Rehydrate("call-1".into())));
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "CONNECTED");

    // Volatile context was rebuilt from the loaded record
    let record = f.registry.persistent_snapshot(&id("call-1")).unwrap();
    assert_eq!(record.current_state, "CONNECTED");

    // Finish the call: rehydrated machine runs to completion
    f.registry
        .send_event(&id("call-1"), Box::new(Hangup::normal()))
        .await;
    f.registry.quiesce().await;
    assert!(!f.registry.contains(&id("call-1")));
    assert!(
        ContextStore::<TestRecord>::is_complete(f.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn send_event_rehydrates_through_the_resolver() {
    let f = fixture(true);
    let table = Arc::clone(&f.table);
    f.registry
        .set_resolver(move |machine_id| Some(call_machine(machine_id.as_str(), &table)));

    park_call(&f, "call-1").await;

    // Scenario 5: the HANGUP for an evicted call brings it back
    let delivered = f
        .registry
        .send_event(&id("call-1"), Box::new(Hangup::normal()))
        .await;
    assert!(delivered);
    f.registry.quiesce().await;

    assert!(f.listener.contains(&Recorded::Rehydrate("call-1".into())));
    assert!(!f.registry.contains(&id("call-1")));
    assert!(
        ContextStore::<TestRecord>::is_complete(f.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );
    assert!(f
        .listener
        .transitions_for("call-1")
        .contains(&(Some("CONNECTED".to_string()), "HUNGUP".to_string())));
}

#[tokio::test]
async fn without_resolver_send_event_does_not_rehydrate() {
    let f = fixture(true);
    park_call(&f, "call-1").await;

    let delivered = f
        .registry
        .send_event(&id("call-1"), Box::new(Hangup::normal()))
        .await;
    assert!(!delivered);
    assert!(f
        .listener
        .drops_for("call-1")
        .iter()
        .any(|(_, reason)| *reason == DropReason::NoSuchMachine));
}

#[tokio::test]
async fn complete_record_is_not_rehydratable() {
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

    let table = Arc::clone(&f.table);
    let err = f
        .registry
        .create_or_get(&id("call-1"), || call_machine("call-1", &table))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::MachineComplete(_)));
    assert!(!f.registry.contains(&id("call-1")));
}

#[tokio::test]
async fn rehydration_disabled_creates_fresh() {
    let f = fixture(true);
    park_call(&f, "call-1").await;

    f.registry.set_rehydration_enabled(false);
    let table = Arc::clone(&f.table);
    let outcome = f
        .registry
        .create_or_get(&id("call-1"), || call_machine("call-1", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Created);
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
}

#[tokio::test]
async fn rehydration_preserves_last_state_change() {
    let f = fixture(true);
    f.clock.set_epoch_ms(5_000);
    park_call(&f, "call-1").await;

    let parked: TestRecord = f.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(parked.last_state_change, 5_000);

    f.clock.set_epoch_ms(90_000);
    let table = Arc::clone(&f.table);
    f.registry
        .create_or_get(&id("call-1"), || call_machine("call-1", &table))
        .await
        .unwrap();

    let record = f.registry.persistent_snapshot(&id("call-1")).unwrap();
    assert_eq!(
        record.last_state_change, 5_000,
        "rehydration must not restamp the record"
    );
}

#[tokio::test]
async fn rehydrating_into_a_timeout_state_arms_the_timer() {
    let f = fixture(false);
    // Persist a record parked in RINGING without going through the
    // registry, as a partitioned peer process would have left it.
    let mut record = TestRecord::new("RINGING");
    record.last_state_change = 1_000;
    f.store.save(&id("call-7"), &record).await.unwrap();

    let table = Arc::clone(&f.table);
    let outcome = f
        .registry
        .create_or_get(&id("call-7"), || call_machine("call-7", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Rehydrated);
    assert_eq!(f.registry.current_state(&id("call-7")).unwrap(), "RINGING");

    f.clock.advance(Duration::from_secs(31));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-7")).unwrap(), "IDLE");
}
