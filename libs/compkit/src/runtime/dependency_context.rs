//! Dependency Context - the per-run record table shared by all construction tasks.
//!
//! One global mutex guards the table: record states, the realized order and
//! the wait-for graph. Every record also has its own [`Notify`] that is
//! created up front and never replaced, so waiters can subscribe without the
//! lock and be woken after the settling transition is published.
//!
//! Cycle detection uses the wait-for graph: an edge `A -> B` exists while a
//! lookup made by component `A` is suspended on `B`. A new lookup `A -> B` is
//! a cycle exactly when `A` is reachable from `B` (or `A == B`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::contracts::ComponentHandle;
use crate::error::{CancelledComponent, ComponentError, FailedComponent, LoadError};
use crate::registry::ComponentRegistry;
use crate::state::{ComponentSnapshot, ComponentState, ManagerSnapshot, RunState};

/// Bookkeeping for one component.
#[derive(Debug)]
struct Record {
    state: ComponentState,
    handle: Option<ComponentHandle>,
    error: Option<ComponentError>,
    /// Survives `take_load_error()` so snapshots keep showing the cause.
    error_summary: Option<String>,
    construction_seq: Option<u64>,
    settled_at: Option<DateTime<Utc>>,
    waiters: usize,
    torn_down: bool,
}

impl Record {
    fn new() -> Self {
        Self {
            state: ComponentState::Pending,
            handle: None,
            error: None,
            error_summary: None,
            construction_seq: None,
            settled_at: None,
            waiters: 0,
            torn_down: false,
        }
    }
}

#[derive(Debug)]
struct Table {
    records: HashMap<String, Record>,
    /// Realized order: every Ready/Failed transition, in the order it happened.
    realized: Vec<String>,
    /// Wait-for graph: waiting component -> components it is suspended on.
    waits: HashMap<String, Vec<String>>,
    run_state: RunState,
    hook_failures: Vec<FailedComponent>,
}

impl Table {
    fn record_mut(&mut self, name: &str) -> Result<&mut Record, ComponentError> {
        self.records
            .get_mut(name)
            .ok_or_else(|| ComponentError::UnknownComponent {
                requester: name.to_string(),
                dependency: name.to_string(),
            })
    }

    /// Path `from -> ... -> to` through the wait-for graph, if one exists.
    fn wait_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        fn dfs<'a>(
            waits: &'a HashMap<String, Vec<String>>,
            node: &'a str,
            goal: &str,
            path: &mut Vec<&'a str>,
            visited: &mut HashSet<&'a str>,
        ) -> bool {
            path.push(node);
            if node == goal {
                return true;
            }
            if visited.insert(node) {
                for next in waits.get(node).into_iter().flatten() {
                    if dfs(waits, next, goal, path, visited) {
                        return true;
                    }
                }
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        let mut visited = HashSet::new();
        dfs(&self.waits, from, to, &mut path, &mut visited)
            .then(|| path.into_iter().map(str::to_string).collect())
    }

    fn add_wait(&mut self, waiter: &str, target: &str) {
        self.waits
            .entry(waiter.to_string())
            .or_default()
            .push(target.to_string());
        if let Some(record) = self.records.get_mut(target) {
            record.waiters += 1;
        }
    }

    fn remove_wait(&mut self, waiter: &str, target: &str) {
        if let Some(targets) = self.waits.get_mut(waiter) {
            if let Some(pos) = targets.iter().position(|t| t == target) {
                targets.swap_remove(pos);
            }
            if targets.is_empty() {
                self.waits.remove(waiter);
            }
        }
        if let Some(record) = self.records.get_mut(target) {
            record.waiters = record.waiters.saturating_sub(1);
        }
    }

    /// Common part of Ready/Failed: state flip plus sequence assignment.
    fn settle_with_seq(
        &mut self,
        name: &str,
        state: ComponentState,
    ) -> Result<(&mut Record, u64), ComponentError> {
        let seq = self.realized.len() as u64;
        let record = self.records.get_mut(name).ok_or_else(|| ComponentError::UnknownComponent {
            requester: name.to_string(),
            dependency: name.to_string(),
        })?;
        if record.state.is_settled() {
            return Err(ComponentError::AlreadySettled {
                component: name.to_string(),
                state: record.state,
            });
        }
        record.state = state;
        record.construction_seq = Some(seq);
        record.settled_at = Some(Utc::now());
        self.realized.push(name.to_string());
        Ok((record, seq))
    }
}

/// Outcome of one look at the target record under the lock.
enum Probe {
    Settled(Result<ComponentHandle, ComponentError>),
    Suspend,
}

/// Removes a wait-for edge when the suspended lookup ends, however it ends
/// (settlement, cancellation, or the factory future being dropped by a timeout).
struct WaitEdge<'a> {
    ctx: &'a DependencyContext,
    waiter: &'a str,
    target: &'a str,
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        self.ctx.table.lock().remove_wait(self.waiter, self.target);
    }
}

/// Result of a Failed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub seq: u64,
    /// This failure was the first one and moved the run to Aborting.
    pub triggered_abort: bool,
}

/// Shared per-run state: one record per enabled component.
#[derive(Debug)]
pub struct DependencyContext {
    run_id: Uuid,
    table: Mutex<Table>,
    /// Immutable after construction; one per enabled record.
    notifiers: HashMap<String, Arc<Notify>>,
    /// Lifecycle token of each component, cancelled when that component is
    /// torn down or settles without becoming Ready.
    lifecycles: HashMap<String, CancellationToken>,
    /// Registry order, for snapshots and the cancelled list.
    order: Vec<String>,
    disabled: HashSet<String>,
    cancel: CancellationToken,
}

impl DependencyContext {
    pub fn new(registry: &ComponentRegistry, cancel: CancellationToken) -> Self {
        let mut records = HashMap::new();
        let mut notifiers = HashMap::new();
        let mut lifecycles = HashMap::new();
        let mut order = Vec::new();
        let mut disabled = HashSet::new();

        for entry in registry.entries() {
            if entry.enabled {
                records.insert(entry.name.clone(), Record::new());
                notifiers.insert(entry.name.clone(), Arc::new(Notify::new()));
                lifecycles.insert(entry.name.clone(), CancellationToken::new());
                order.push(entry.name.clone());
            } else {
                disabled.insert(entry.name.clone());
            }
        }

        Self {
            run_id: Uuid::new_v4(),
            table: Mutex::new(Table {
                records,
                realized: Vec::new(),
                waits: HashMap::new(),
                run_state: RunState::Idle,
                hook_failures: Vec::new(),
            }),
            notifiers,
            lifecycles,
            order,
            disabled,
            cancel,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Lifecycle token of `name`. Unknown names get an already cancelled token.
    pub fn lifecycle_token(&self, name: &str) -> CancellationToken {
        match self.lifecycles.get(name) {
            Some(token) => token.clone(),
            None => {
                let token = CancellationToken::new();
                token.cancel();
                token
            }
        }
    }

    /// Cancel the lifecycle token of `name`.
    pub fn end_lifecycle(&self, name: &str) {
        if let Some(token) = self.lifecycles.get(name) {
            token.cancel();
        }
    }

    /// Cancel every lifecycle token still live.
    pub fn end_all_lifecycles(&self) {
        for token in self.lifecycles.values() {
            token.cancel();
        }
    }

    pub fn run_state(&self) -> RunState {
        self.table.lock().run_state
    }

    /// Move the run forward. Backwards moves are ignored.
    pub fn advance_run_state(&self, next: RunState) {
        let mut table = self.table.lock();
        if rank(next) > rank(table.run_state) {
            tracing::debug!(from = %table.run_state, to = %next, "Run state changed");
            table.run_state = next;
        }
    }

    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        self.table.lock().records.get(name).map(|r| r.state)
    }

    /// Names of all records in the realized order.
    pub fn realized_order(&self) -> Vec<String> {
        self.table.lock().realized.clone()
    }

    /// Ready records, last-settled first.
    pub fn ready_in_reverse(&self) -> Vec<String> {
        let table = self.table.lock();
        table
            .realized
            .iter()
            .rev()
            .filter(|name| {
                table
                    .records
                    .get(name.as_str())
                    .is_some_and(|r| r.state == ComponentState::Ready && !r.torn_down)
            })
            .cloned()
            .collect()
    }

    /// Single-owner claim: Pending -> Constructing. Only the first caller wins.
    pub fn claim(&self, name: &str) -> bool {
        let mut table = self.table.lock();
        match table.records.get_mut(name) {
            Some(record) if record.state == ComponentState::Pending => {
                record.state = ComponentState::Constructing;
                true
            }
            _ => false,
        }
    }

    /// Publish a constructed instance and wake every waiter.
    pub fn mark_ready(&self, name: &str, handle: ComponentHandle) -> Result<u64, ComponentError> {
        let seq = {
            let mut table = self.table.lock();
            let (record, seq) = table.settle_with_seq(name, ComponentState::Ready)?;
            record.handle = Some(handle);
            seq
        };
        self.wake(name);
        Ok(seq)
    }

    /// Record a construction failure, wake every waiter, and abort the run
    /// if this is the first failure.
    pub fn mark_failed(&self, name: &str, error: ComponentError) -> Result<Settled, ComponentError> {
        let (seq, triggered_abort) = {
            let mut table = self.table.lock();
            let (record, seq) = table.settle_with_seq(name, ComponentState::Failed)?;
            record.error_summary = Some(error.chain());
            record.error = Some(error);
            let triggered_abort = table.run_state == RunState::Starting;
            if triggered_abort {
                table.run_state = RunState::Aborting;
            }
            (seq, triggered_abort)
        };
        if triggered_abort {
            self.cancel.cancel();
        }
        self.end_lifecycle(name);
        self.wake(name);
        Ok(Settled {
            seq,
            triggered_abort,
        })
    }

    /// Settle a record as a bystander of an aborted run. Gets no sequence number.
    pub fn mark_cancelled(&self, name: &str, reason: impl Into<String>) -> Result<(), ComponentError> {
        {
            let mut table = self.table.lock();
            let record = table.record_mut(name)?;
            if record.state.is_settled() {
                return Err(ComponentError::AlreadySettled {
                    component: name.to_string(),
                    state: record.state,
                });
            }
            record.state = ComponentState::Cancelled;
            record.error_summary = Some(reason.into());
            record.settled_at = Some(Utc::now());
        }
        self.end_lifecycle(name);
        self.wake(name);
        Ok(())
    }

    fn wake(&self, name: &str) {
        if let Some(notify) = self.notifiers.get(name) {
            notify.notify_waiters();
        }
    }

    /// Obtain `target` on behalf of `requester`, suspending until it settles.
    ///
    /// - Ready: returns immediately.
    /// - Failed / Cancelled: `DependencyUnavailable`.
    /// - Pending / Constructing: suspends; wakes on settlement or abort.
    /// - Lookups that would close a cycle in the wait-for graph fail with
    ///   `CyclicDependency` instead of suspending.
    pub async fn resolve(
        &self,
        requester: &str,
        target: &str,
    ) -> Result<ComponentHandle, ComponentError> {
        let Some(notify) = self.notifiers.get(target) else {
            return Err(if self.disabled.contains(target) {
                ComponentError::ComponentDisabled {
                    requester: requester.to_string(),
                    dependency: target.to_string(),
                }
            } else {
                ComponentError::UnknownComponent {
                    requester: requester.to_string(),
                    dependency: target.to_string(),
                }
            });
        };

        let notified = notify.notified();
        tokio::pin!(notified);
        let mut edge: Option<WaitEdge<'_>> = None;

        loop {
            // Subscribe before looking so a settlement between the look and
            // the await is not lost.
            notified.as_mut().enable();

            match self.probe(requester, target, edge.is_none()) {
                Probe::Settled(result) => return result,
                Probe::Suspend => {
                    if edge.is_none() {
                        edge = Some(WaitEdge {
                            ctx: self,
                            waiter: requester,
                            target,
                        });
                        tracing::debug!(component = requester, dependency = target, "Waiting for dependency");
                    }
                }
            }

            tokio::select! {
                _ = &mut notified => {
                    notified.set(notify.notified());
                }
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    fn probe(&self, requester: &str, target: &str, first_look: bool) -> Probe {
        let mut table = self.table.lock();
        let Some(record) = table.records.get(target) else {
            return Probe::Settled(Err(ComponentError::UnknownComponent {
                requester: requester.to_string(),
                dependency: target.to_string(),
            }));
        };

        match record.state {
            ComponentState::Ready => {
                return Probe::Settled(match &record.handle {
                    Some(handle) => Ok(handle.clone()),
                    None => Err(ComponentError::DependencyUnavailable {
                        requester: requester.to_string(),
                        dependency: target.to_string(),
                        reason: "already torn down".to_string(),
                    }),
                });
            }
            ComponentState::Failed | ComponentState::Cancelled => {
                let reason = match (&record.state, &record.error_summary) {
                    (_, Some(summary)) => summary.clone(),
                    (state, None) => state.to_string(),
                };
                return Probe::Settled(Err(ComponentError::DependencyUnavailable {
                    requester: requester.to_string(),
                    dependency: target.to_string(),
                    reason,
                }));
            }
            ComponentState::Pending | ComponentState::Constructing => {}
        }

        if self.cancel.is_cancelled() {
            return Probe::Settled(Err(ComponentError::LoadCancelled {
                component: requester.to_string(),
            }));
        }

        if first_look {
            if let Some(chain) = table.wait_path(target, requester) {
                let mut path = Vec::with_capacity(chain.len() + 1);
                path.push(requester.to_string());
                path.extend(chain);
                return Probe::Settled(Err(ComponentError::CyclicDependency { path }));
            }
            table.add_wait(requester, target);
        }

        Probe::Suspend
    }

    /// Take the instance out of its record for teardown. The record stays Ready.
    pub fn take_handle(&self, name: &str) -> Option<ComponentHandle> {
        let mut table = self.table.lock();
        let record = table.records.get_mut(name)?;
        record.torn_down = true;
        record.handle.take()
    }

    /// Clone of a Ready instance without suspending.
    pub fn get_ready(&self, name: &str) -> Option<ComponentHandle> {
        let table = self.table.lock();
        table
            .records
            .get(name)
            .filter(|r| r.state == ComponentState::Ready)
            .and_then(|r| r.handle.clone())
    }

    pub fn record_hook_failure(&self, name: &str, error: ComponentError) {
        let mut table = self.table.lock();
        table.hook_failures.push(FailedComponent {
            name: name.to_string(),
            error,
        });
    }

    /// Every record is Ready and no post-load hook has failed.
    pub fn all_ready(&self) -> bool {
        let table = self.table.lock();
        table.hook_failures.is_empty()
            && table
                .records
                .values()
                .all(|r| r.state == ComponentState::Ready)
    }

    /// Number of lookups currently suspended on `name`.
    pub fn waiters_of(&self, name: &str) -> usize {
        self.table
            .lock()
            .records
            .get(name)
            .map(|r| r.waiters)
            .unwrap_or(0)
    }

    /// Build the aggregate error, moving each failure's original error out of its record.
    pub fn take_load_error(&self) -> LoadError {
        let mut table = self.table.lock();
        let realized = table.realized.clone();

        let mut failed = Vec::new();
        for name in &realized {
            if let Some(record) = table.records.get_mut(name) {
                if let Some(error) = record.error.take() {
                    failed.push(FailedComponent {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }
        failed.append(&mut table.hook_failures);

        let cancelled = self
            .order
            .iter()
            .filter_map(|name| {
                let record = table.records.get(name)?;
                (record.state == ComponentState::Cancelled).then(|| CancelledComponent {
                    name: name.clone(),
                    reason: record
                        .error_summary
                        .clone()
                        .unwrap_or_else(|| "cancelled".to_string()),
                })
            })
            .collect();

        LoadError { failed, cancelled }
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let table = self.table.lock();
        let components = self
            .order
            .iter()
            .filter_map(|name| {
                let record = table.records.get(name)?;
                Some(ComponentSnapshot {
                    name: name.clone(),
                    state: record.state,
                    construction_seq: record.construction_seq,
                    settled_at: record.settled_at,
                    error: record.error_summary.clone(),
                    torn_down: record.torn_down,
                })
            })
            .collect();

        ManagerSnapshot {
            run_id: self.run_id,
            run_state: table.run_state,
            components,
        }
    }
}

fn rank(state: RunState) -> u8 {
    match state {
        RunState::Idle => 0,
        RunState::Starting => 1,
        RunState::Completed => 2,
        RunState::Aborting => 3,
        RunState::Aborted => 4,
        RunState::Stopped => 5,
    }
}
