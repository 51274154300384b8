//! Scenario: a complete call from setup to hangup.

use crate::prelude::*;
use std::time::Duration;
use xbar_storage::ContextStore;

#[tokio::test]
async fn call_runs_idle_to_hungup() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-1", &d.table))
        .await
        .unwrap();

    assert!(d.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await);
    assert!(d.registry.send_event(&id("call-1"), Box::new(Answer)).await);
    assert!(d.registry.send_event(&id("call-1"), Box::new(Hangup)).await);
    d.registry.quiesce().await;

    // Final state reached, machine evicted, record complete
    assert!(!d.registry.contains(&id("call-1")));
    assert!(d.log.saw(&Observed::Remove("call-1".into())));
    let record: CallDetail = d.store.load(&id("call-1")).await.unwrap().unwrap();
    assert_eq!(record.current_state, "HUNGUP");
    assert!(record.complete);
    assert_eq!(record.caller, "+15550100");

    // Three notifications after the initial one, in order
    assert_eq!(
        d.log.transitions("call-1"),
        [
            (None, "IDLE".to_string()),
            (Some("IDLE".to_string()), "RINGING".to_string()),
            (Some("RINGING".to_string()), "CONNECTED".to_string()),
            (Some("CONNECTED".to_string()), "HUNGUP".to_string()),
        ]
    );
}

#[tokio::test]
async fn hangup_while_ringing_short_circuits() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-2", &d.table))
        .await
        .unwrap();

    d.registry.send_event(&id("call-2"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-2"), Box::new(Hangup)).await;
    d.registry.quiesce().await;

    assert!(!d.registry.contains(&id("call-2")));
    let record: CallDetail = d.store.load(&id("call-2")).await.unwrap().unwrap();
    assert_eq!(record.current_state, "HUNGUP");
    assert!(record.complete);
}

#[tokio::test]
async fn finished_call_rejects_further_signalling() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-3", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-3"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-3"), Box::new(Hangup)).await;
    d.registry.quiesce().await;

    assert!(!d.registry.send_event(&id("call-3"), Box::new(Answer)).await);
    assert!(
        ContextStore::<CallDetail>::is_complete(d.store.as_ref(), &id("call-3"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn state_survives_in_store_after_every_hop() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-4", &d.table))
        .await
        .unwrap();

    d.registry.send_event(&id("call-4"), Box::new(IncomingCall)).await;
    d.registry.quiesce().await;
    let record: CallDetail = d.store.load(&id("call-4")).await.unwrap().unwrap();
    assert_eq!(record.current_state, "RINGING");

    d.registry.send_event(&id("call-4"), Box::new(Answer)).await;
    d.registry.quiesce().await;
    let record: CallDetail = d.store.load(&id("call-4")).await.unwrap().unwrap();
    assert_eq!(record.current_state, "CONNECTED");

    // In-memory view matches the persisted view
    assert_eq!(
        d.registry.current_state(&id("call-4")).unwrap(),
        record.current_state
    );
}
