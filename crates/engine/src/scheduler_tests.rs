// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use xbar_core::{Clock, FakeClock};

fn id(s: &str) -> MachineId {
    MachineId::new(s)
}

#[test]
fn timeout_lifecycle() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("call-1"), 1, Duration::from_secs(10), clock.now());
    assert!(scheduler.has_pending());
    assert!(scheduler.next_deadline().is_some());

    // Not due yet
    clock.advance(Duration::from_secs(5));
    assert!(scheduler.due(clock.now()).is_empty());
    assert!(scheduler.has_pending());

    // Fires
    clock.advance(Duration::from_secs(10));
    let fired = scheduler.due(clock.now());
    assert_eq!(
        fired,
        vec![TimeoutFire {
            machine: id("call-1"),
            epoch: 1
        }]
    );
    assert!(!scheduler.has_pending());
}

#[test]
fn cancel_suppresses_fire() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("call-1"), 1, Duration::from_secs(10), clock.now());
    scheduler.cancel("call-1");

    clock.advance(Duration::from_secs(15));
    assert!(scheduler.due(clock.now()).is_empty());
    assert!(!scheduler.has_pending());
}

#[test]
fn rearm_supersedes_earlier_entry() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("call-1"), 1, Duration::from_secs(10), clock.now());

    // Machine left and re-entered the state; new epoch, longer deadline
    clock.advance(Duration::from_secs(2));
    scheduler.schedule(id("call-1"), 2, Duration::from_secs(20), clock.now());

    // The old entry surfaces due but its epoch is stale
    clock.advance(Duration::from_secs(9));
    assert!(scheduler.due(clock.now()).is_empty());
    assert!(scheduler.has_pending());

    clock.advance(Duration::from_secs(12));
    let fired = scheduler.due(clock.now());
    assert_eq!(
        fired,
        vec![TimeoutFire {
            machine: id("call-1"),
            epoch: 2
        }]
    );
}

#[test]
fn machines_fire_independently() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("fast"), 1, Duration::from_secs(5), clock.now());
    scheduler.schedule(id("slow"), 1, Duration::from_secs(20), clock.now());

    clock.advance(Duration::from_secs(6));
    let fired = scheduler.due(clock.now());
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].machine, id("fast"));
    assert!(scheduler.has_pending(), "slow timer should still be armed");

    clock.advance(Duration::from_secs(15));
    let fired = scheduler.due(clock.now());
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].machine, id("slow"));
    assert!(!scheduler.has_pending());
}

#[test]
fn due_pops_all_expired_at_once() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("a"), 1, Duration::from_secs(5), clock.now());
    scheduler.schedule(id("b"), 1, Duration::from_secs(10), clock.now());
    scheduler.schedule(id("c"), 1, Duration::from_secs(15), clock.now());

    clock.advance(Duration::from_secs(11));
    let fired = scheduler.due(clock.now());
    let machines: Vec<&str> = fired.iter().map(|f| f.machine.as_str()).collect();
    assert_eq!(machines, ["a", "b"]);

    assert_eq!(scheduler.armed_count(), 1);
}

#[test]
fn next_deadline_is_earliest() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("later"), 1, Duration::from_secs(30), clock.now());
    scheduler.schedule(id("sooner"), 1, Duration::from_secs(10), clock.now());

    let deadline = scheduler.next_deadline().unwrap();
    assert_eq!(deadline, clock.now() + Duration::from_secs(10));
}

#[test]
fn empty_scheduler_has_no_deadline() {
    let scheduler = TimeoutScheduler::new();
    assert!(!scheduler.has_pending());
    assert!(scheduler.next_deadline().is_none());
}

#[test]
fn clear_discards_armed_timeouts() {
    let clock = FakeClock::new();
    let mut scheduler = TimeoutScheduler::new();

    scheduler.schedule(id("a"), 1, Duration::from_secs(5), clock.now());
    scheduler.schedule(id("b"), 1, Duration::from_secs(5), clock.now());
    scheduler.clear();

    clock.advance(Duration::from_secs(10));
    assert!(scheduler.due(clock.now()).is_empty());
    assert_eq!(scheduler.armed_count(), 0);
}
