//! Component Manager - drives one load run from spawn to reverse teardown
//!
//! Startup spawns one task per enabled component. Each task claims its own
//! record, runs the factory, and settles the record. The first failure moves
//! the run to Aborting and cancels the shared token; every suspended lookup
//! and every not-yet-started task observes it.
//!
//! Teardown walks the realized order backwards: the last component to become
//! Ready is stopped first.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use compkit_bootstrap::ManagerConfig;
use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::context::{ComponentContext, LoadMonitor};
use crate::contracts::{Component, ComponentHandle};
use crate::error::{ComponentError, LoadError};
use crate::registry::{ComponentRegistry, RegistryEntry};
use crate::runtime::DependencyContext;
use crate::state::{ComponentState, ManagerSnapshot, RunState};

/// What one construction task ended with, before it is written to the record.
enum Outcome {
    Built(ComponentHandle),
    Errored(anyhow::Error),
    Panicked(String),
    TimedOut(Duration),
    Aborted,
}

/// Owner of one run's instances.
///
/// Obtained from [`ComponentManager::start`] only when every enabled
/// component is Ready and every `on_all_components_loaded` hook succeeded.
/// Instances live until [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct ComponentManager {
    deps: Arc<DependencyContext>,
    teardown_grace: Duration,
}

impl ComponentManager {
    /// Construct every enabled component of `registry`.
    ///
    /// On failure, every component that did become Ready is already torn
    /// down when this returns.
    pub async fn start(
        registry: ComponentRegistry,
        config: &ManagerConfig,
    ) -> Result<Self, LoadError> {
        Self::start_with_cancel(registry, config, &CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), with a parent token: cancelling it aborts
    /// a load in progress. Once the load has completed the parent no longer
    /// affects the run; use [`shutdown`](Self::shutdown).
    pub async fn start_with_cancel(
        registry: ComponentRegistry,
        config: &ManagerConfig,
        parent: &CancellationToken,
    ) -> Result<Self, LoadError> {
        let deps = Arc::new(DependencyContext::new(&registry, CancellationToken::new()));
        let manager = Self {
            deps,
            teardown_grace: config.teardown_grace,
        };

        let span = tracing::info_span!("load", run_id = %manager.deps.run_id());
        manager
            .load(registry, config.construction_timeout, parent)
            .instrument(span)
            .await?;
        Ok(manager)
    }

    async fn load(
        &self,
        registry: ComponentRegistry,
        default_timeout: Option<Duration>,
        parent: &CancellationToken,
    ) -> Result<(), LoadError> {
        let started = Instant::now();
        let disabled = registry.disabled_names().len();
        self.deps.advance_run_state(RunState::Starting);
        tracing::info!(
            components = registry.len() - disabled,
            disabled,
            "Starting component load"
        );

        let mut tasks = JoinSet::new();
        let mut task_names = HashMap::new();
        for entry in registry.into_entries().into_iter().filter(|e| e.enabled) {
            let deps = Arc::clone(&self.deps);
            let name = entry.name.clone();
            let span = tracing::debug_span!("construct", component = %name);
            let task = tasks.spawn(construct(deps, entry, default_timeout).instrument(span));
            task_names.insert(task.id(), name);
        }

        let mut watch_parent = true;
        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let name = task_names.get(&e.id()).cloned();
                        self.settle_dead_task(name, e);
                    }
                },
                _ = parent.cancelled(), if watch_parent => {
                    watch_parent = false;
                    tracing::warn!("Shutdown requested during load; aborting");
                    self.deps.advance_run_state(RunState::Aborting);
                    self.deps.cancellation_token().cancel();
                }
            }
        }

        // Anything still unsettled has no task left to settle it.
        for leftover in self
            .deps
            .snapshot()
            .components
            .into_iter()
            .filter(|c| !c.state.is_settled())
        {
            settle_cancelled(&self.deps, &leftover.name, "construction task ended without settling");
        }

        if !self.deps.all_ready() || self.deps.is_cancelled() {
            return Err(self.abort().await);
        }

        self.deps.advance_run_state(RunState::Completed);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            order = ?self.deps.realized_order(),
            "All components loaded"
        );

        if let Err(e) = self.notify_loaded().await {
            tracing::error!(error = %e, "Post-load hook failed; aborting run");
            return Err(self.abort().await);
        }

        Ok(())
    }

    /// A construction task that panicked outside the factory, or was aborted,
    /// never settled its record. Settle it here so the run aborts with the
    /// real cause.
    fn settle_dead_task(&self, name: Option<String>, error: JoinError) {
        let Some(name) = name else {
            tracing::error!(error = %error, "Unknown construction task ended abnormally");
            return;
        };
        if self.deps.state_of(&name).is_some_and(|s| s.is_settled()) {
            tracing::error!(component = %name, error = %error, "Construction task ended abnormally after settling");
            return;
        }
        if error.is_panic() {
            let message = panic_message(error.into_panic().as_ref());
            settle_failed(
                &self.deps,
                &name,
                ComponentError::Panicked {
                    component: name.clone(),
                    message,
                },
                0,
            );
        } else {
            settle_cancelled(&self.deps, &name, "construction task ended without settling");
        }
    }

    /// `on_all_components_loaded` for every component, in realized order.
    /// Returns the error chain of the first failing hook.
    async fn notify_loaded(&self) -> Result<(), String> {
        for name in self.deps.realized_order() {
            let Some(handle) = self.deps.get_ready(&name) else {
                continue;
            };
            if let Err(source) = handle.component().on_all_components_loaded().await {
                let error = ComponentError::Hook {
                    component: name.clone(),
                    hook: "on_all_components_loaded",
                    source,
                };
                let chain = error.chain();
                self.deps.record_hook_failure(&name, error);
                return Err(chain);
            }
        }
        Ok(())
    }

    /// Settle the run as Aborted, tear down whatever is Ready, build the aggregate.
    async fn abort(&self) -> LoadError {
        self.deps.advance_run_state(RunState::Aborting);
        self.deps.cancellation_token().cancel();
        self.deps.advance_run_state(RunState::Aborted);

        let snapshot = self.deps.snapshot();
        tracing::error!(
            ready = snapshot.count(ComponentState::Ready),
            failed = snapshot.count(ComponentState::Failed),
            cancelled = snapshot.count(ComponentState::Cancelled),
            "Component load aborted; tearing down ready components"
        );

        self.teardown().await;
        self.deps.take_load_error()
    }

    /// Stop and release every Ready component in reverse realized order.
    /// Each component's lifecycle token is cancelled right before its own
    /// `stop()`; the tokens of its dependencies stay live until their turn.
    async fn teardown(&self) {
        for name in self.deps.ready_in_reverse() {
            let Some(handle) = self.deps.take_handle(&name) else {
                continue;
            };
            self.deps.end_lifecycle(&name);
            let started = Instant::now();
            match tokio::time::timeout(self.teardown_grace, handle.component().stop()).await {
                Ok(Ok(())) => {
                    tracing::info!(
                        component = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Component stopped"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(component = %name, error = %e, "Component stop failed");
                }
                Err(_) => {
                    tracing::warn!(
                        component = %name,
                        grace = ?self.teardown_grace,
                        "Component stop exceeded grace period; moving on"
                    );
                }
            }
            // the record's handle holds two strong refs (trait object + Any)
            if handle.strong_count() > 2 {
                tracing::warn!(
                    component = %name,
                    refs = handle.strong_count() - 2,
                    "Component is still referenced after teardown"
                );
            }
            drop(handle);
        }
        self.deps.end_all_lifecycles();
    }

    /// Orderly shutdown of a completed run: stopping hooks in reverse realized
    /// order, then reverse teardown.
    pub async fn shutdown(self) {
        let span = tracing::info_span!("shutdown", run_id = %self.deps.run_id());
        async {
            tracing::info!("Stopping components");
            let reverse = self.deps.ready_in_reverse();
            for name in &reverse {
                if let Some(handle) = self.deps.get_ready(name) {
                    handle.component().on_all_components_are_stopping().await;
                }
            }
            self.deps.cancellation_token().cancel();
            self.teardown().await;
            self.deps.advance_run_state(RunState::Stopped);
            tracing::info!(components = reverse.len(), "All components stopped");
        }
        .instrument(span)
        .await
    }

    pub fn run_id(&self) -> Uuid {
        self.deps.run_id()
    }

    pub fn run_state(&self) -> RunState {
        self.deps.run_state()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.deps.snapshot()
    }

    /// Names in the order they finished constructing.
    pub fn realized_order(&self) -> Vec<String> {
        self.deps.realized_order()
    }

    /// Typed access to a Ready component.
    pub fn get<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        self.deps.get_ready(name)?.downcast::<T>()
    }

    pub fn load_monitor(&self) -> LoadMonitor {
        LoadMonitor::new(&self.deps)
    }
}

/// Body of one construction task.
async fn construct(deps: Arc<DependencyContext>, entry: RegistryEntry, default_timeout: Option<Duration>) {
    let timeout = entry.construction_timeout(default_timeout);
    let RegistryEntry {
        name,
        factory,
        config,
        ..
    } = entry;

    if deps.is_cancelled() {
        settle_cancelled(&deps, &name, "load aborted before construction started");
        return;
    }
    if !deps.claim(&name) {
        tracing::warn!(component = %name, "Record already claimed; skipping construction");
        return;
    }
    tracing::debug!(component = %name, "Constructing");

    let started = Instant::now();
    let ctx = ComponentContext::new(name.as_str(), Arc::clone(&deps));
    let build = AssertUnwindSafe(factory.build(config, ctx)).catch_unwind();
    let build = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, build).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
            None => Some(build.await),
        }
    };

    let cancel = deps.cancellation_token().clone();
    let outcome = tokio::select! {
        biased;
        result = build => match (result, timeout) {
            (Some(Ok(Ok(handle))), _) => Outcome::Built(handle),
            (Some(Ok(Err(e))), _) => Outcome::Errored(e),
            (Some(Err(payload)), _) => Outcome::Panicked(panic_message(payload.as_ref())),
            (None, Some(limit)) => Outcome::TimedOut(limit),
            (None, None) => Outcome::Aborted,
        },
        _ = cancel.cancelled() => Outcome::Aborted,
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Outcome::Built(handle) => match deps.mark_ready(&name, handle) {
            Ok(seq) => {
                tracing::debug!(component = %name, seq, elapsed_ms, state = "ready", "Component ready");
            }
            Err(e) => tracing::error!(component = %name, error = %e, "Cannot publish component"),
        },
        Outcome::Errored(e) => match classify(&name, e) {
            Err(reason) => settle_cancelled(&deps, &name, reason),
            Ok(error) => settle_failed(&deps, &name, error, elapsed_ms),
        },
        Outcome::Panicked(message) => settle_failed(
            &deps,
            &name,
            ComponentError::Panicked {
                component: name.clone(),
                message,
            },
            elapsed_ms,
        ),
        Outcome::TimedOut(limit) => settle_failed(
            &deps,
            &name,
            ComponentError::ConstructionTimeout {
                component: name.clone(),
                timeout: limit,
            },
            elapsed_ms,
        ),
        Outcome::Aborted => settle_cancelled(&deps, &name, "load aborted while constructing"),
    }
}

/// Root cause (`Ok`) or bystander (`Err` with the cancellation reason).
fn classify(name: &str, error: anyhow::Error) -> Result<ComponentError, String> {
    match error.downcast::<ComponentError>() {
        Ok(e) if e.is_cascade() => Err(e.to_string()),
        Ok(e) => Ok(e),
        Err(source) => Ok(ComponentError::Factory {
            component: name.to_string(),
            source,
        }),
    }
}

fn settle_failed(deps: &DependencyContext, name: &str, error: ComponentError, elapsed_ms: u64) {
    let chain = error.chain();
    let label = error.as_label();
    match deps.mark_failed(name, error) {
        Ok(settled) => {
            tracing::error!(
                component = %name,
                seq = settled.seq,
                elapsed_ms,
                state = "failed",
                kind = label,
                error = %chain,
                "Component failed"
            );
            if settled.triggered_abort {
                tracing::warn!(component = %name, "First failure; cancelling remaining components");
            }
        }
        Err(e) => tracing::error!(component = %name, error = %e, "Cannot record failure"),
    }
}

fn settle_cancelled(deps: &DependencyContext, name: &str, reason: impl Into<String>) {
    let reason = reason.into();
    match deps.mark_cancelled(name, reason.clone()) {
        Ok(()) => tracing::warn!(component = %name, state = "cancelled", %reason, "Component cancelled"),
        Err(e) => tracing::error!(component = %name, error = %e, "Cannot record cancellation"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn cascade_errors_classify_as_cancelled() {
        let err = anyhow::Error::new(ComponentError::LoadCancelled {
            component: "a".into(),
        });
        assert!(classify("a", err).is_err());

        let err = anyhow::Error::new(ComponentError::DependencyUnavailable {
            requester: "a".into(),
            dependency: "b".into(),
            reason: "failed".into(),
        });
        assert!(classify("a", err).is_err());
    }

    #[test]
    fn root_causes_keep_their_kind() {
        let err = anyhow::Error::new(ComponentError::CyclicDependency {
            path: vec!["a".into(), "a".into()],
        });
        assert!(matches!(
            classify("a", err),
            Ok(ComponentError::CyclicDependency { .. })
        ));

        let err = anyhow::anyhow!("bind failed");
        assert!(matches!(classify("http", err), Ok(ComponentError::Factory { .. })));
    }

    #[test]
    fn cascade_is_seen_through_context() {
        let err: anyhow::Result<()> = Err(ComponentError::LoadCancelled {
            component: "a".into(),
        }
        .into());
        let err = err.context("resolving logger").unwrap_err();
        assert!(classify("a", err).is_err());
    }

    #[test]
    fn panic_payloads() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(p.as_ref()), "bang");
        let p: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(p.as_ref()), "non-string panic payload");
    }
}
