// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use xbar_core::ActionError;

#[tokio::test]
async fn faulting_handler_reports_without_state_change() {
    register_call_events();
    let table: CallTable = Arc::new(
        TableBuilder::new("call")
            .initial("IDLE")
            .state("IDLE")
            .on::<IncomingCall>()
            .go("RINGING")
            .on::<SessionProgress>()
            .stay(|_scope, _event| Err(ActionError::new("media fault")))
            .end()
            .state("RINGING")
            .end()
            .build()
            .unwrap(),
    );
    let f = fixture(false);
    f.registry
        .register(Machine::new("call-1", Arc::clone(&table), TestRecord::new("IDLE")))
        .await
        .unwrap();

    f.registry
        .send_event(&id("call-1"), Box::new(SessionProgress))
        .await;
    f.registry.quiesce().await;

    assert!(f.listener.contains(&Recorded::Fault {
        id: "call-1".into(),
        state: "IDLE".into(),
        error: "media fault".into(),
    }));
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert_eq!(f.registry.metrics().faults, 1);

    // The machine keeps dispatching after a fault
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "RINGING");
}

#[tokio::test]
async fn removed_listener_stops_observing() {
    let f = fixture(false);
    let extra = Arc::new(Recording::default());
    f.registry.add_listener(extra.clone());

    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    assert!(extra.contains(&Recorded::Create("call-1".into())));

    let as_dyn: Arc<dyn RegistryListener<TestRecord, TestScratch>> = extra.clone();
    f.registry.remove_listener(&as_dyn);

    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;

    assert!(extra.transitions_for("call-1").len() == 1, "only the initial transition");
    assert!(f
        .listener
        .transitions_for("call-1")
        .contains(&(Some("IDLE".to_string()), "RINGING".to_string())));
}

#[tokio::test]
async fn every_go_emits_exactly_one_transition_event() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.send_event(&id("call-1"), Box::new(Answer)).await;
    f.registry.quiesce().await;

    let transitions = f.listener.transitions_for("call-1");
    assert_eq!(transitions.len(), 3, "initial + two moves, no duplicates");
    assert_eq!(f.registry.metrics().transitions, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reentrant_send_from_listener_is_rejected() {
    struct Reentrant {
        registry: Mutex<Option<CallRegistry>>,
        outcome: Mutex<Vec<bool>>,
    }

    impl RegistryListener<TestRecord, TestScratch> for Reentrant {
        fn on_state_machine_event(
            &self,
            id: &MachineId,
            _old: Option<&str>,
            new_state: &str,
            _persistent: &TestRecord,
            _volatile: Option<&TestScratch>,
        ) {
            if new_state != "RINGING" {
                return;
            }
            let Some(registry) = self.registry.lock().clone() else {
                return;
            };
            let delivered = tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current()
                    .block_on(registry.send_event(id, Box::new(Answer)))
            });
            self.outcome.lock().push(delivered);
        }
    }

    let f = fixture(false);
    let reentrant = Arc::new(Reentrant {
        registry: Mutex::new(Some(f.registry.clone())),
        outcome: Mutex::new(Vec::new()),
    });
    f.registry.add_listener(reentrant.clone());

    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;

    assert_eq!(*reentrant.outcome.lock(), vec![false]);
    assert!(f
        .listener
        .drops_for("call-1")
        .iter()
        .any(|(_, reason)| *reason == DropReason::Reentrant));
    // The rejected send changed nothing
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "RINGING");
}
