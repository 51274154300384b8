//! Scenario: an offline state parks the call out of memory; later
//! signalling rehydrates it from the store.

use crate::prelude::*;
use std::time::Duration;
use xbar_engine::CreateOutcome;
use xbar_storage::ContextStore;

#[tokio::test]
async fn connected_offline_parks_and_resumes() {
    let d = deploy(Duration::from_secs(30), true);
    let table = std::sync::Arc::clone(&d.table);
    d.registry
        .set_resolver(move |machine_id| Some(call_machine(machine_id.as_str(), &table)));

    d.registry
        .register(call_machine("call-1", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-1"), Box::new(Answer)).await;
    d.registry.quiesce().await;

    // Entering the offline CONNECTED state evicted the machine but
    // kept its record resumable.
    assert!(!d.registry.contains(&id("call-1")));
    assert!(d.log.saw(&Observed::Remove("call-1".into())));
    assert!(
        !ContextStore::<CallDetail>::is_complete(d.store.as_ref(), &id("call-1"))
            .await
            .unwrap()
    );

    // The HANGUP for the parked call rehydrates and completes it.
    assert!(d.registry.send_event(&id("call-1"), Box::new(Hangup)).await);
    d.registry.quiesce().await;

    assert!(d.log.saw(&Observed::Rehydrate("call-1".into())));
    assert!(!d.registry.contains(&id("call-1")));
    let record: CallDetail = d.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(record.current_state, "HUNGUP");
    assert!(record.complete);
    assert!(d
        .log
        .transitions("call-1")
        .contains(&(Some("CONNECTED".to_string()), "HUNGUP".to_string())));
}

#[tokio::test]
async fn parked_call_rehydrates_via_create_or_get() {
    let d = deploy(Duration::from_secs(30), true);
    d.registry
        .register(call_machine("call-2", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-2"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-2"), Box::new(Answer)).await;
    d.registry.quiesce().await;
    assert!(!d.registry.contains(&id("call-2")));

    let table = std::sync::Arc::clone(&d.table);
    let outcome = d
        .registry
        .create_or_get(&id("call-2"), || call_machine("call-2", &table))
        .await
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Rehydrated);
    assert_eq!(d.registry.current_state(&id("call-2")).unwrap(), "CONNECTED");

    // The call context came back intact
    let record = d.registry.persistent_snapshot(&id("call-2")).unwrap();
    assert_eq!(record.caller, "+15550100");
    assert_eq!(record.callee, "+15550199");
}

#[tokio::test]
async fn rehydration_switch_disables_parking_recovery() {
    let d = deploy(Duration::from_secs(30), true);
    let table = std::sync::Arc::clone(&d.table);
    d.registry
        .set_resolver(move |machine_id| Some(call_machine(machine_id.as_str(), &table)));

    d.registry
        .register(call_machine("call-3", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-3"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-3"), Box::new(Answer)).await;
    d.registry.quiesce().await;

    d.registry.set_rehydration_enabled(false);
    assert!(!d.registry.send_event(&id("call-3"), Box::new(Hangup)).await);

    d.registry.set_rehydration_enabled(true);
    assert!(d.registry.send_event(&id("call-3"), Box::new(Hangup)).await);
    d.registry.quiesce().await;
    let record: CallDetail = d.store.load(&id("call-3")).await.unwrap().unwrap();
    assert!(record.complete);
}
