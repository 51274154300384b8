// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::EnqueuePolicy;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use xbar_core::EventTypes;

/// Ordered test event: the payload is the expected position in the
/// machine's stream.
#[derive(Debug)]
struct Seq(u32);

fn register_seq_event() {
    EventTypes::global().register::<Seq>("SEQ").unwrap();
}

/// Table whose single state checks strict ordering and mutual
/// exclusion of handler runs. Violations are counted, never panicked,
/// so the dispatch pool's behavior stays observable.
fn ordered_table(
    busy_violations: Arc<AtomicU32>,
    order_violations: Arc<AtomicU32>,
    in_handler: Arc<AtomicBool>,
) -> CallTable {
    register_seq_event();
    Arc::new(
        TableBuilder::new("ordered")
            .initial("LOOP")
            .state("LOOP")
            .on::<Seq>()
            .stay(move |scope: &mut ActionScope<'_, TestRecord, TestScratch>, event| {
                if in_handler.swap(true, Ordering::SeqCst) {
                    busy_violations.fetch_add(1, Ordering::SeqCst);
                }
                if let Some(seq) = event.as_any().downcast_ref::<Seq>() {
                    if seq.0 != scope.persistent.ring_count {
                        order_violations.fetch_add(1, Ordering::SeqCst);
                    }
                }
                scope.persistent.ring_count += 1;
                in_handler.store(false, Ordering::SeqCst);
                Ok(())
            })
            .end()
            .build()
            .unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn handlers_run_serially_in_enqueue_order_per_machine() {
    const MACHINES: usize = 40;
    const EVENTS: u32 = 50;

    let store = Arc::new(xbar_storage::MemoryStore::new());
    let clock = FakeClock::new();
    // Generous mailboxes: this test asserts zero loss
    let config = RegistryConfig::default()
        .mailbox_capacity(EVENTS as usize + 8)
        .max_concurrent_machines(16);
    let registry: CallRegistry = Registry::new(Arc::clone(&store), clock, config);

    let busy = Arc::new(AtomicU32::new(0));
    let order = Arc::new(AtomicU32::new(0));

    let mut producers = Vec::new();
    for m in 0..MACHINES {
        let machine_id = format!("sess-{m}");
        let table = ordered_table(
            Arc::clone(&busy),
            Arc::clone(&order),
            Arc::new(AtomicBool::new(false)),
        );
        registry
            .register(Machine::new(
                machine_id.as_str(),
                Arc::clone(&table),
                TestRecord::new("LOOP"),
            ))
            .await
            .unwrap();

        // One producer per machine so enqueue order is well defined
        let registry = registry.clone();
        producers.push(tokio::spawn(async move {
            let mid = id(&machine_id);
            for n in 0..EVENTS {
                assert!(registry.send_event(&mid, Box::new(Seq(n))).await);
                if n % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    registry.quiesce().await;

    assert_eq!(busy.load(Ordering::SeqCst), 0, "overlapping handler runs");
    assert_eq!(order.load(Ordering::SeqCst), 0, "events out of enqueue order");
    for m in 0..MACHINES {
        let record = registry.persistent_snapshot(&id(&format!("sess-{m}"))).unwrap();
        assert_eq!(record.ring_count, EVENTS, "machine sess-{m} lost events");
    }
    assert_eq!(
        registry.metrics().accepted,
        (MACHINES as u64) * (EVENTS as u64)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_machine_loses_nothing_that_was_accepted() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: u32 = 40;

    register_seq_event();
    let table: CallTable = Arc::new(
        TableBuilder::new("counter")
            .initial("LOOP")
            .state("LOOP")
            .on::<Seq>()
            .stay(|scope: &mut ActionScope<'_, TestRecord, TestScratch>, _event| {
                scope.persistent.ring_count += 1;
                Ok(())
            })
            .end()
            .build()
            .unwrap(),
    );

    let store = Arc::new(xbar_storage::MemoryStore::new());
    let config = RegistryConfig::default().mailbox_capacity(16);
    let registry: CallRegistry = Registry::new(Arc::clone(&store), FakeClock::new(), config);
    registry
        .register(Machine::new("hot", Arc::clone(&table), TestRecord::new("LOOP")))
        .await
        .unwrap();

    let accepted = Arc::new(AtomicU32::new(0));
    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let registry = registry.clone();
        let accepted = Arc::clone(&accepted);
        producers.push(tokio::spawn(async move {
            for n in 0..PER_PRODUCER {
                if registry.send_event(&id("hot"), Box::new(Seq(n))).await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    registry.quiesce().await;

    // Everything accepted was processed exactly once; everything else
    // was rejected as MachineBusy and counted as dropped.
    let record = registry.persistent_snapshot(&id("hot")).unwrap();
    assert_eq!(record.ring_count, accepted.load(Ordering::SeqCst));
    let metrics = registry.metrics();
    assert_eq!(
        metrics.dropped,
        (PRODUCERS as u64) * (PER_PRODUCER as u64) - u64::from(accepted.load(Ordering::SeqCst))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_enqueue_waits_for_space() {
    register_seq_event();
    let table: CallTable = Arc::new(
        TableBuilder::new("counter")
            .initial("LOOP")
            .state("LOOP")
            .on::<Seq>()
            .stay(|scope: &mut ActionScope<'_, TestRecord, TestScratch>, _event| {
                scope.persistent.ring_count += 1;
                Ok(())
            })
            .end()
            .build()
            .unwrap(),
    );

    let store = Arc::new(xbar_storage::MemoryStore::new());
    let config = RegistryConfig::default()
        .mailbox_capacity(2)
        .enqueue_policy(EnqueuePolicy::Block {
            timeout: Duration::from_secs(5),
        });
    let registry: CallRegistry = Registry::new(Arc::clone(&store), FakeClock::new(), config);
    registry
        .register(Machine::new("slow", Arc::clone(&table), TestRecord::new("LOOP")))
        .await
        .unwrap();

    // Far more events than the mailbox holds; the producer must block
    // rather than drop.
    for n in 0..50 {
        assert!(registry.send_event(&id("slow"), Box::new(Seq(n))).await);
    }
    registry.quiesce().await;

    let record = registry.persistent_snapshot(&id("slow")).unwrap();
    assert_eq!(record.ring_count, 50);
    assert_eq!(registry.metrics().dropped, 0);
}
