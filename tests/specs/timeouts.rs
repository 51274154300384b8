//! Scenario: ring timeout returns an unanswered call to IDLE.

use crate::prelude::*;
use std::time::Duration;
use xbar_core::SystemClock;
use xbar_engine::{Registry, RegistryConfig};
use xbar_storage::MemoryStore;

#[tokio::test]
async fn unanswered_ring_times_out_to_idle() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-1", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    d.registry.quiesce().await;
    assert_eq!(d.registry.current_state(&id("call-1")).unwrap(), "RINGING");

    // 30s + 1ms with no ANSWER
    d.clock.advance(Duration::from_millis(30_001));
    assert_eq!(d.registry.poll_timeouts(), 1);
    d.registry.quiesce().await;

    assert_eq!(d.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert!(d.registry.contains(&id("call-1")), "no eviction on timeout");
    assert!(d
        .log
        .transitions("call-1")
        .contains(&(Some("RINGING".to_string()), "IDLE".to_string())));
}

#[tokio::test]
async fn answer_beats_the_timeout() {
    let d = deploy(Duration::from_secs(30), false);
    d.registry
        .register(call_machine("call-2", &d.table))
        .await
        .unwrap();
    d.registry.send_event(&id("call-2"), Box::new(IncomingCall)).await;
    d.registry.send_event(&id("call-2"), Box::new(Answer)).await;
    d.registry.quiesce().await;

    d.clock.advance(Duration::from_secs(120));
    assert_eq!(d.registry.poll_timeouts(), 0);
    assert_eq!(d.registry.current_state(&id("call-2")).unwrap(), "CONNECTED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_driver_fires_on_the_system_clock() {
    register_events();
    let table = call_table(Duration::from_millis(100), false);
    let store = std::sync::Arc::new(MemoryStore::new());
    let config = RegistryConfig::default().timer_resolution(Duration::from_millis(10));
    let registry: Registry<CallDetail, MediaSession, std::sync::Arc<MemoryStore>, SystemClock> =
        Registry::new(std::sync::Arc::clone(&store), SystemClock, config);
    let driver = registry.spawn_timeout_driver();

    registry
        .register(call_machine("call-3", &table))
        .await
        .unwrap();
    registry.send_event(&id("call-3"), Box::new(IncomingCall)).await;
    registry.quiesce().await;

    // Wait out the 100ms ring timeout with margin
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if registry.current_state(&id("call-3")).as_deref() == Some("IDLE") {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "ring timeout never fired"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    registry.shutdown().await;
    let _ = driver.await;
}
