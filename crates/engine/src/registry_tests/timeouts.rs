// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn ring_timeout_returns_call_to_idle() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "RINGING");

    // One millisecond short: nothing fires
    f.clock.advance(Duration::from_millis(29_999));
    assert_eq!(f.registry.poll_timeouts(), 0);

    f.clock.advance(Duration::from_millis(2));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;

    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert!(f.registry.contains(&id("call-1")), "timeout does not evict");
    assert_eq!(f.registry.metrics().timeouts_fired, 1);
    assert!(f
        .listener
        .transitions_for("call-1")
        .contains(&(Some("RINGING".to_string()), "IDLE".to_string())));
}

#[tokio::test]
async fn answering_disarms_the_ring_timeout() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.send_event(&id("call-1"), Box::new(Answer)).await;
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "CONNECTED");

    f.clock.advance(Duration::from_secs(60));
    assert_eq!(f.registry.poll_timeouts(), 0);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "CONNECTED");
    assert_eq!(f.registry.metrics().timeouts_stale, 0);
}

#[tokio::test]
async fn stay_does_not_reset_the_timeout() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;

    // Progress messages trickle in for 29 seconds
    for _ in 0..4 {
        f.clock.advance(Duration::from_secs(7));
        f.registry
            .send_event(&id("call-1"), Box::new(SessionProgress))
            .await;
        f.registry.quiesce().await;
        assert_eq!(f.registry.poll_timeouts(), 0);
    }

    // The original 30s deadline still stands
    f.clock.advance(Duration::from_secs(3));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
}

#[tokio::test]
async fn reentering_a_timeout_state_rearms_from_scratch() {
    let f = fixture(false);
    f.registry
        .register(call_machine("call-1", &f.table))
        .await
        .unwrap();

    // First ring times out
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;
    f.clock.advance(Duration::from_secs(31));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");

    // Second call rings again with a fresh deadline
    f.registry.send_event(&id("call-1"), Box::new(IncomingCall)).await;
    f.registry.quiesce().await;
    f.clock.advance(Duration::from_secs(29));
    assert_eq!(f.registry.poll_timeouts(), 0);
    f.clock.advance(Duration::from_secs(2));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert_eq!(f.registry.metrics().timeouts_fired, 2);
}

#[tokio::test]
async fn timeouts_fire_per_machine() {
    let f = fixture(false);
    for n in 0..3 {
        f.registry
            .register(call_machine(&format!("call-{n}"), &f.table))
            .await
            .unwrap();
    }
    // Stagger the rings by 10s
    for n in 0..3 {
        f.registry
            .send_event(&id(&format!("call-{n}")), Box::new(IncomingCall))
            .await;
        f.registry.quiesce().await;
        f.clock.advance(Duration::from_secs(10));
    }

    // call-0 rang 30s ago, call-1 20s, call-2 10s
    f.clock.advance(Duration::from_secs(1));
    assert_eq!(f.registry.poll_timeouts(), 1);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-0")).unwrap(), "IDLE");
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "RINGING");
    assert_eq!(f.registry.current_state(&id("call-2")).unwrap(), "RINGING");

    f.clock.advance(Duration::from_secs(20));
    assert_eq!(f.registry.poll_timeouts(), 2);
    f.registry.quiesce().await;
    assert_eq!(f.registry.current_state(&id("call-1")).unwrap(), "IDLE");
    assert_eq!(f.registry.current_state(&id("call-2")).unwrap(), "IDLE");
}
