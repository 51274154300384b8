// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The registry: live machine index, event dispatch, lifecycle.
//!
//! Dispatch design: every machine has a bounded mailbox plus a
//! `scheduled` flag. Sending to an idle machine claims the flag and
//! spawns a drain task onto the shared tokio pool; further sends just
//! enqueue. The drain task is the only holder of the machine's serial
//! lock while it runs, so handlers for one machine never overlap, and
//! idle machines cost no task or thread at all. A semaphore caps how
//! many machines drain at once.
//!
//! Membership (`live`) is guarded by a short-held mutex that is never
//! taken across handler execution or provider I/O.

use crate::config::RegistryConfig;
use crate::error::{DropReason, RegistryError};
use crate::listener::{ListenerSet, RegistryListener};
use crate::machine::{Applied, Machine, Snapshot};
use crate::mailbox::{Envelope, Mailbox};
use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::scheduler::TimeoutScheduler;
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use xbar_core::{
    ActionError, Clock, ContextRecord, EventTypes, MachineEvent, MachineId, TimeoutFired,
    TIMEOUT_EVENT,
};
use xbar_storage::{ContextStore, StoreError};

/// How `create_or_get` satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The machine was already live.
    Existing,
    /// A fresh machine was started from its initial state.
    Created,
    /// A persisted, non-complete record was loaded back into memory.
    Rehydrated,
}

const PHASE_RUNNING: u8 = 0;
const PHASE_DRAINING: u8 = 1;
const PHASE_STOPPED: u8 = 2;

thread_local! {
    /// Machine currently dispatching on this thread. Used to reject
    /// reentrant sends from handlers and listeners.
    static DISPATCHING: RefCell<Option<MachineId>> = const { RefCell::new(None) };
}

/// Scoped marker for the reentrancy check.
struct DispatchGuard;

impl DispatchGuard {
    fn enter(id: &MachineId) -> Self {
        DISPATCHING.with(|current| *current.borrow_mut() = Some(id.clone()));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|current| *current.borrow_mut() = None);
    }
}

fn is_dispatching(id: &MachineId) -> bool {
    DISPATCHING.with(|current| current.borrow().as_ref() == Some(id))
}

/// Factory consulted by `send_event` for unknown ids, enabling
/// rehydrate-on-demand without a caller-supplied factory per send.
type Resolver<P, V> = Arc<dyn Fn(&MachineId) -> Option<Machine<P, V>> + Send + Sync>;

/// Last externally observable state, readable without the serial lock.
struct Published<P> {
    state: String,
    persistent: P,
}

/// One live machine with its mailbox and serial lock.
struct Cell<P: ContextRecord, V> {
    id: MachineId,
    mailbox: Mailbox,
    machine: tokio::sync::Mutex<Machine<P, V>>,
    published: RwLock<Published<P>>,
    evicted: AtomicBool,
}

impl<P: ContextRecord, V> Cell<P, V> {
    fn new(id: MachineId, machine: Machine<P, V>, mailbox_capacity: usize) -> Self {
        let published = Published {
            state: machine.current_state().to_string(),
            persistent: machine.persistent().clone(),
        };
        Self {
            id,
            mailbox: Mailbox::new(mailbox_capacity),
            machine: tokio::sync::Mutex::new(machine),
            published: RwLock::new(published),
            evicted: AtomicBool::new(false),
        }
    }
}

struct Inner<P: ContextRecord, V, S, C: Clock> {
    live: Mutex<HashMap<MachineId, Arc<Cell<P, V>>>>,
    listeners: ListenerSet<P, V>,
    store: S,
    scheduler: Mutex<TimeoutScheduler>,
    clock: C,
    config: RegistryConfig,
    resolver: RwLock<Option<Resolver<P, V>>>,
    rehydration_enabled: AtomicBool,
    phase: AtomicU8,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    drained: Notify,
    metrics: RegistryMetrics,
}

/// Owns the live set of machines and dispatches their events.
///
/// Cheap to clone; clones share the same registry.
pub struct Registry<P: ContextRecord, V, S, C: Clock> {
    inner: Arc<Inner<P, V, S, C>>,
}

impl<P: ContextRecord, V, S, C: Clock> Clone for Registry<P, V, S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, V, S, C> Registry<P, V, S, C>
where
    P: ContextRecord,
    V: Send + 'static,
    S: ContextStore<P> + 'static,
    C: Clock + 'static,
{
    pub fn new(store: S, clock: C, config: RegistryConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_machines));
        let rehydration_enabled = AtomicBool::new(config.rehydration_enabled);
        Self {
            inner: Arc::new(Inner {
                live: Mutex::new(HashMap::new()),
                listeners: ListenerSet::new(),
                store,
                scheduler: Mutex::new(TimeoutScheduler::new()),
                clock,
                config,
                resolver: RwLock::new(None),
                rehydration_enabled,
                phase: AtomicU8::new(PHASE_RUNNING),
                permits,
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                metrics: RegistryMetrics::default(),
            }),
        }
    }

    /// Install the factory `send_event` consults to rehydrate unknown
    /// ids on demand. Without one, sends to unknown ids return false.
    pub fn set_resolver(
        &self,
        resolver: impl Fn(&MachineId) -> Option<Machine<P, V>> + Send + Sync + 'static,
    ) {
        *self.inner.resolver.write() = Some(Arc::new(resolver));
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener<P, V>>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RegistryListener<P, V>>) {
        self.inner.listeners.remove(listener);
    }

    /// Operator lever: when disabled, unknown ids are never looked up
    /// in persistence — not by `create_or_get`, not by `send_event`.
    pub fn set_rehydration_enabled(&self, enabled: bool) {
        self.inner.rehydration_enabled.store(enabled, Ordering::Release);
    }

    pub fn rehydration_enabled(&self) -> bool {
        self.inner.rehydration_enabled.load(Ordering::Acquire)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn contains(&self, id: &MachineId) -> bool {
        self.inner.live.lock().contains_key(id)
    }

    /// Last committed state of a live machine. Readers may observe a
    /// value at most one transition old.
    pub fn current_state(&self, id: &MachineId) -> Option<String> {
        let cell = self.inner.live.lock().get(id).cloned()?;
        let state = cell.published.read().state.clone();
        Some(state)
    }

    /// Last committed persistent context of a live machine.
    pub fn persistent_snapshot(&self, id: &MachineId) -> Option<P> {
        let cell = self.inner.live.lock().get(id).cloned()?;
        let persistent = cell.published.read().persistent.clone();
        Some(persistent)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.phase.load(Ordering::Acquire) != PHASE_RUNNING
    }

    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Insert and start a machine under its own id. Fails when the id
    /// is live or the initial save fails; on failure the machine is
    /// not registered.
    pub async fn register(&self, machine: Machine<P, V>) -> Result<(), RegistryError> {
        self.ensure_running()?;
        let id = machine.id().clone();
        let cell = match self.insert_new_cell(&id, machine) {
            Ok(cell) => cell,
            Err(_) => return Err(RegistryError::AlreadyRegistered(id)),
        };
        match self.start_machine(&cell).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_cell(&cell);
                Err(e)
            }
        }
    }

    /// Return the live machine for `id`, rehydrate it from a persisted
    /// non-complete record, or create it fresh via `factory`.
    ///
    /// Two concurrent calls for the same id converge on one instance:
    /// the insert is double-checked and the loser yields to the winner.
    pub async fn create_or_get<F>(
        &self,
        id: &MachineId,
        factory: F,
    ) -> Result<CreateOutcome, RegistryError>
    where
        F: FnOnce() -> Machine<P, V>,
    {
        self.ensure_running()?;
        if self.inner.live.lock().contains_key(id) {
            return Ok(CreateOutcome::Existing);
        }

        if self.rehydration_enabled() && self.inner.store.exists(id).await? {
            if self.inner.store.is_complete(id).await? {
                return Err(RegistryError::MachineComplete(id.clone()));
            }
            if let Some(ctx) = self.inner.store.load(id).await? {
                return match self.admit_rehydrated(id, factory(), ctx) {
                    Some(_) => Ok(CreateOutcome::Rehydrated),
                    None => Ok(CreateOutcome::Existing),
                };
            }
            // Record vanished between exists and load; fall through.
        }

        let cell = match self.insert_new_cell(id, factory()) {
            Ok(cell) => cell,
            Err(_) => return Ok(CreateOutcome::Existing),
        };
        match self.start_machine(&cell).await {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) => {
                self.discard_cell(&cell);
                Err(e)
            }
        }
    }

    /// Deliver an event to a machine's mailbox.
    ///
    /// Returns `true` when the event was accepted for dispatch (not
    /// when it was processed). Never fails for normal conditions: the
    /// reason for a `false` is reported through listeners, metrics,
    /// and logs.
    pub async fn send_event(&self, id: &MachineId, event: Box<dyn MachineEvent>) -> bool {
        let name = match EventTypes::global().name_of(event.as_ref()) {
            Ok(name) => name,
            Err(e) => {
                warn!(id = %id, error = %e, "dropping event with unregistered type");
                self.report_drop(id, "", DropReason::UnknownEventType);
                return false;
            }
        };
        if self.inner.phase.load(Ordering::Acquire) != PHASE_RUNNING {
            self.report_drop(id, name, DropReason::Draining);
            return false;
        }
        if is_dispatching(id) {
            warn!(id = %id, event = name, "reentrant dispatch rejected");
            self.report_drop(id, name, DropReason::Reentrant);
            return false;
        }
        let Some(cell) = self.lookup_or_rehydrate(id).await else {
            self.report_drop(id, name, DropReason::NoSuchMachine);
            return false;
        };

        let accepted = cell
            .mailbox
            .push(Envelope { name, event }, self.inner.config.enqueue_policy)
            .await;
        if !accepted {
            warn!(id = %id, event = name, "mailbox full, event rejected");
            self.report_drop(id, name, DropReason::MachineBusy);
            return false;
        }
        self.inner.metrics.accepted.fetch_add(1, Ordering::Relaxed);
        self.spawn_drain(cell);
        true
    }

    /// Evict a machine from the live set without a terminal
    /// transition. Its pending timeout is cancelled and queued events
    /// are dropped; persistence is left as last saved.
    pub fn remove_machine(&self, id: &MachineId) -> bool {
        let Some(cell) = self.inner.live.lock().remove(id) else {
            return false;
        };
        cell.evicted.store(true, Ordering::Release);
        self.inner.scheduler.lock().cancel(id.as_str());
        for envelope in cell.mailbox.drain_all() {
            self.report_drop(id, envelope.name, DropReason::Evicted);
        }
        self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        info!(id = %id, "machine removed");
        self.inner.listeners.for_each(|l| l.on_registry_remove(id));
        true
    }

    /// Deliver every timeout due at the clock's current reading.
    /// Returns the number delivered. The production driver calls this
    /// on an interval; deterministic tests call it after advancing a
    /// fake clock.
    pub fn poll_timeouts(&self) -> usize {
        let now = self.inner.clock.now();
        let due = self.inner.scheduler.lock().due(now);
        let mut delivered = 0;
        for fire in due {
            let Some(cell) = self.inner.live.lock().get(&fire.machine).cloned() else {
                continue;
            };
            let envelope = Envelope {
                name: TIMEOUT_EVENT,
                event: Box::new(TimeoutFired { epoch: fire.epoch }),
            };
            if cell.mailbox.try_push(envelope).is_ok() {
                self.inner.metrics.timeouts_fired.fetch_add(1, Ordering::Relaxed);
                self.spawn_drain(cell);
                delivered += 1;
            } else {
                // The state either already moved on or will re-arm;
                // the epoch check makes skipping redelivery safe.
                warn!(id = %fire.machine, "mailbox full, timeout dropped");
            }
        }
        delivered
    }

    /// Spawn the timer task that polls due timeouts at the configured
    /// resolution until shutdown.
    pub fn spawn_timeout_driver(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(registry.inner.config.timer_resolution);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if registry.inner.phase.load(Ordering::Acquire) != PHASE_RUNNING {
                    break;
                }
                registry.poll_timeouts();
            }
        })
    }

    /// Drain and stop: new sends fail, workers finish the event in
    /// hand, armed timeouts are discarded, and mailboxes still holding
    /// events after the drain deadline are dropped with a log.
    pub async fn shutdown(&self) {
        if self
            .inner
            .phase
            .compare_exchange(PHASE_RUNNING, PHASE_DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("registry draining");

        let wait_for_workers = async {
            loop {
                // Register the waiter before reading in_flight; a
                // notify from the last worker in between is kept.
                let notified = self.inner.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(self.inner.config.shutdown_timeout, wait_for_workers)
            .await
            .is_err()
        {
            warn!("shutdown drain deadline expired");
        }

        let cells: Vec<Arc<Cell<P, V>>> =
            self.inner.live.lock().drain().map(|(_, cell)| cell).collect();
        for cell in cells {
            cell.evicted.store(true, Ordering::Release);
            let undelivered = cell.mailbox.drain_all();
            if undelivered.is_empty() {
                continue;
            }
            warn!(
                id = %cell.id,
                count = undelivered.len(),
                "undelivered events dropped at shutdown"
            );
            for envelope in undelivered {
                self.report_drop(&cell.id, envelope.name, DropReason::Undelivered);
            }
        }
        self.inner.scheduler.lock().clear();
        // Wake any drain still parked on the concurrency budget
        self.inner.permits.close();
        self.inner.phase.store(PHASE_STOPPED, Ordering::Release);
        info!("registry stopped");
    }

    /// Wait until every accepted event has been dispatched. Intended
    /// for tests and orderly handover, not the hot path.
    pub async fn quiesce(&self) {
        loop {
            let busy = self.inner.in_flight.load(Ordering::Acquire) > 0 || {
                let live = self.inner.live.lock();
                live.values()
                    .any(|cell| cell.mailbox.is_claimed() || !cell.mailbox.is_empty())
            };
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // ---- internals ----

    fn ensure_running(&self) -> Result<(), RegistryError> {
        if self.inner.phase.load(Ordering::Acquire) == PHASE_RUNNING {
            Ok(())
        } else {
            Err(RegistryError::Draining)
        }
    }

    /// Double-checked insert: the caller's machine loses to any cell
    /// inserted since the caller last looked.
    fn insert_new_cell(
        &self,
        id: &MachineId,
        machine: Machine<P, V>,
    ) -> Result<Arc<Cell<P, V>>, Arc<Cell<P, V>>> {
        let mut live = self.inner.live.lock();
        if let Some(existing) = live.get(id) {
            return Err(Arc::clone(existing));
        }
        let cell = Arc::new(Cell::new(
            id.clone(),
            machine,
            self.inner.config.mailbox_capacity,
        ));
        live.insert(id.clone(), Arc::clone(&cell));
        Ok(cell)
    }

    fn discard_cell(&self, cell: &Arc<Cell<P, V>>) {
        cell.evicted.store(true, Ordering::Release);
        self.inner.live.lock().remove(&cell.id);
    }

    /// Start a freshly inserted machine: initial entry action, first
    /// save, timeout arming, create + initial-transition notifications.
    async fn start_machine(&self, cell: &Arc<Cell<P, V>>) -> Result<(), RegistryError> {
        let inner = &self.inner;
        let mut machine = cell.machine.lock().await;
        let outcome = machine.begin(inner.clock.epoch_ms())?;
        inner.store.save(&cell.id, machine.persistent()).await?;
        Self::publish(cell, &machine);
        if let Some(arm) = outcome.arm {
            inner.scheduler.lock().schedule(
                cell.id.clone(),
                arm.epoch,
                arm.duration,
                inner.clock.now(),
            );
        }
        debug!(id = %cell.id, state = %machine.current_state(), "machine started");
        {
            let _guard = DispatchGuard::enter(&cell.id);
            inner.listeners.for_each(|l| l.on_registry_create(&cell.id));
            match &outcome.fault {
                None => inner.listeners.for_each(|l| {
                    l.on_state_machine_event(
                        &cell.id,
                        None,
                        machine.current_state(),
                        machine.persistent(),
                        machine.volatile(),
                    )
                }),
                Some(error) => {
                    inner.metrics.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %cell.id, error = %error, "entry action faulted at start");
                    inner.listeners.for_each(|l| {
                        l.on_transition_fault(&cell.id, machine.current_state(), error)
                    });
                }
            }
        }
        Ok(())
    }

    /// Insert a rehydrated machine, arm its current state's timeout,
    /// and notify. Returns `None` when a concurrent call won the
    /// insert.
    fn admit_rehydrated(
        &self,
        id: &MachineId,
        mut machine: Machine<P, V>,
        ctx: P,
    ) -> Option<Arc<Cell<P, V>>> {
        machine.rehydrate(ctx);
        let arm = machine.arm_for_current();
        let cell = self.insert_new_cell(id, machine).ok()?;
        if let Some(arm) = arm {
            self.inner.scheduler.lock().schedule(
                id.clone(),
                arm.epoch,
                arm.duration,
                self.inner.clock.now(),
            );
        }
        self.inner.metrics.rehydrations.fetch_add(1, Ordering::Relaxed);
        info!(id = %id, state = %cell.published.read().state, "machine rehydrated");
        {
            let _guard = DispatchGuard::enter(id);
            self.inner.listeners.for_each(|l| l.on_registry_rehydrate(id));
        }
        Some(cell)
    }

    /// Live lookup with rehydrate-on-demand through the configured
    /// resolver.
    async fn lookup_or_rehydrate(&self, id: &MachineId) -> Option<Arc<Cell<P, V>>> {
        if let Some(cell) = self.inner.live.lock().get(id).cloned() {
            if !cell.evicted.load(Ordering::Acquire) {
                return Some(cell);
            }
            return None;
        }
        if !self.rehydration_enabled() {
            return None;
        }
        let resolver = self.inner.resolver.read().clone()?;

        match self.inner.store.exists(id).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                error!(id = %id, error = %e, "store lookup failed");
                return None;
            }
        }
        match self.inner.store.is_complete(id).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(id = %id, "not rehydrating complete machine");
                return None;
            }
            Err(e) => {
                error!(id = %id, error = %e, "store lookup failed");
                return None;
            }
        }
        let ctx = match self.inner.store.load(id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return None,
            Err(e) => {
                error!(id = %id, error = %e, "context load failed");
                return None;
            }
        };
        let machine = resolver(id)?;
        match self.admit_rehydrated(id, machine, ctx) {
            Some(cell) => Some(cell),
            // Lost the insert race; take the winner.
            None => self.inner.live.lock().get(id).cloned(),
        }
    }

    fn spawn_drain(&self, cell: Arc<Cell<P, V>>) {
        if !cell.mailbox.try_claim() {
            return;
        }
        let registry = self.clone();
        tokio::spawn(async move {
            registry.drain(cell).await;
        });
    }

    /// Drain a claimed mailbox. Exactly one drain task owns a mailbox
    /// at a time; this task holds the machine's serial lock while
    /// processing each batch.
    async fn drain(&self, cell: Arc<Cell<P, V>>) {
        let inner = &self.inner;
        let Ok(_permit) = inner.permits.acquire().await else {
            cell.mailbox.release();
            return;
        };
        inner.in_flight.fetch_add(1, Ordering::AcqRel);

        let mut released = false;
        loop {
            if inner.phase.load(Ordering::Acquire) != PHASE_RUNNING {
                // Finish the event in hand only; shutdown reports the rest.
                break;
            }
            let batch = cell.mailbox.pop_batch(inner.config.drain_batch);
            if batch.is_empty() {
                cell.mailbox.release();
                // Re-check: a send may have landed between pop and release.
                if !cell.mailbox.is_empty() && cell.mailbox.try_claim() {
                    continue;
                }
                released = true;
                break;
            }

            let mut machine = cell.machine.lock().await;
            for envelope in batch {
                if cell.evicted.load(Ordering::Acquire) {
                    self.report_drop(&cell.id, envelope.name, DropReason::Evicted);
                    continue;
                }
                self.process_one(&cell, &mut machine, envelope).await;
            }
        }
        if !released {
            cell.mailbox.release();
        }

        if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            inner.drained.notify_waiters();
        }
    }

    /// Run one event through the transition algorithm and execute the
    /// outcome: persist, publish, arm, notify, evict.
    async fn process_one(
        &self,
        cell: &Arc<Cell<P, V>>,
        machine: &mut Machine<P, V>,
        envelope: Envelope,
    ) {
        let inner = &self.inner;
        if !machine.started() {
            self.report_drop(&cell.id, envelope.name, DropReason::NoSuchMachine);
            return;
        }

        let now_ms = inner.clock.epoch_ms();
        let snapshot = machine.snapshot();
        let handler_start = inner.clock.now();
        let applied = {
            let _guard = DispatchGuard::enter(&cell.id);
            machine.apply(envelope.name, envelope.event.as_ref(), now_ms)
        };
        let elapsed = inner.clock.now().saturating_duration_since(handler_start);
        if elapsed > inner.config.slow_handler_threshold {
            inner.metrics.slow_handlers.fetch_add(1, Ordering::Relaxed);
            warn!(
                id = %cell.id,
                event = envelope.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow handler"
            );
        }

        match applied {
            Applied::Ignored { event_name } => {
                inner.metrics.ignored.fetch_add(1, Ordering::Relaxed);
                debug!(id = %cell.id, event = event_name, "event ignored");
            }
            Applied::StaleTimeout => {
                inner.metrics.timeouts_stale.fetch_add(1, Ordering::Relaxed);
                debug!(id = %cell.id, "stale timeout dropped");
            }
            Applied::Stayed { state } => {
                match inner.store.save(&cell.id, machine.persistent()).await {
                    Ok(()) => {
                        Self::publish(cell, machine);
                        inner.metrics.stays.fetch_add(1, Ordering::Relaxed);
                        let _guard = DispatchGuard::enter(&cell.id);
                        inner.listeners.for_each(|l| {
                            l.on_state_machine_event(
                                &cell.id,
                                Some(&state),
                                &state,
                                machine.persistent(),
                                machine.volatile(),
                            )
                        });
                    }
                    Err(e) => self.fail_save(cell, machine, snapshot, &state, e),
                }
            }
            Applied::Moved {
                from,
                to,
                is_final,
                is_offline,
                arm,
            } => match inner.store.save(&cell.id, machine.persistent()).await {
                Ok(()) => {
                    Self::publish(cell, machine);
                    {
                        let mut scheduler = inner.scheduler.lock();
                        scheduler.cancel(cell.id.as_str());
                        if let Some(arm) = arm {
                            scheduler.schedule(
                                cell.id.clone(),
                                arm.epoch,
                                arm.duration,
                                inner.clock.now(),
                            );
                        }
                    }
                    inner.metrics.transitions.fetch_add(1, Ordering::Relaxed);
                    debug!(id = %cell.id, from = %from, to = %to, "transition");
                    {
                        let _guard = DispatchGuard::enter(&cell.id);
                        inner.listeners.for_each(|l| {
                            l.on_state_machine_event(
                                &cell.id,
                                Some(&from),
                                &to,
                                machine.persistent(),
                                machine.volatile(),
                            )
                        });
                    }
                    if is_final || is_offline {
                        self.evict(cell, is_final);
                    }
                }
                Err(e) => self.fail_save(cell, machine, snapshot, &from, e),
            },
            Applied::Faulted { state, error } => {
                inner.metrics.faults.fetch_add(1, Ordering::Relaxed);
                warn!(id = %cell.id, state = %state, error = %error, "transition fault");
                let _guard = DispatchGuard::enter(&cell.id);
                inner
                    .listeners
                    .for_each(|l| l.on_transition_fault(&cell.id, &state, &error));
            }
        }
    }

    /// Persistence failed: roll the machine back and report the fault.
    /// The prior arm epoch is restored with the snapshot, so a timeout
    /// armed for the pre-transition state stays valid.
    fn fail_save(
        &self,
        cell: &Arc<Cell<P, V>>,
        machine: &mut Machine<P, V>,
        snapshot: Snapshot<P>,
        prior_state: &str,
        e: StoreError,
    ) {
        machine.restore_snapshot(snapshot);
        self.inner.metrics.faults.fetch_add(1, Ordering::Relaxed);
        error!(id = %cell.id, error = %e, "persistence failed, transition rolled back");
        let fault = ActionError::new(format!("persistence error: {e}"));
        let _guard = DispatchGuard::enter(&cell.id);
        self.inner
            .listeners
            .for_each(|l| l.on_transition_fault(&cell.id, prior_state, &fault));
    }

    /// Terminal or offline entry: drop from the live set. The record
    /// was already saved — complete for final states, resumable for
    /// offline ones.
    fn evict(&self, cell: &Arc<Cell<P, V>>, is_final: bool) {
        cell.evicted.store(true, Ordering::Release);
        self.inner.live.lock().remove(&cell.id);
        self.inner.scheduler.lock().cancel(cell.id.as_str());
        self.inner.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        info!(id = %cell.id, complete = is_final, "machine evicted");
        let _guard = DispatchGuard::enter(&cell.id);
        self.inner.listeners.for_each(|l| l.on_registry_remove(&cell.id));
    }

    fn publish(cell: &Cell<P, V>, machine: &Machine<P, V>) {
        let mut published = cell.published.write();
        published.state = machine.current_state().to_string();
        published.persistent = machine.persistent().clone();
    }

    fn report_drop(&self, id: &MachineId, event_name: &str, reason: DropReason) {
        self.inner.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(id = %id, event = event_name, reason = %reason, "event dropped");
        self.inner
            .listeners
            .for_each(|l| l.on_dropped_event(id, event_name, reason));
    }
}

#[cfg(test)]
#[path = "registry_tests/mod.rs"]
mod tests;
