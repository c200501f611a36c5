//! Per-component view of the running load.
//!
//! A factory receives a [`ComponentContext`] bound to its own name; every
//! lookup made through it is attributed to that component in the wait-for
//! graph and in error messages.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::contracts::{Component, ComponentHandle};
use crate::error::ComponentError;
use crate::runtime::DependencyContext;
use crate::state::{ManagerSnapshot, RunState};

#[derive(Clone)]
pub struct ComponentContext {
    component: Arc<str>,
    deps: Arc<DependencyContext>,
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("component", &self.component)
            .field("run_id", &self.deps.run_id())
            .finish()
    }
}

impl ComponentContext {
    pub(crate) fn new(component: impl Into<Arc<str>>, deps: Arc<DependencyContext>) -> Self {
        Self {
            component: component.into(),
            deps,
        }
    }

    /// Name of the component this context was handed to.
    pub fn component_name(&self) -> &str {
        &self.component
    }

    /// Obtain another component, suspending until it is constructed.
    ///
    /// Fails with `CyclicDependency` when the lookup would close a cycle,
    /// `DependencyUnavailable` when the dependency failed or was cancelled,
    /// and `LoadCancelled` when the run aborts while waiting.
    pub async fn resolve(&self, name: &str) -> Result<ComponentHandle, ComponentError> {
        self.deps.resolve(&self.component, name).await
    }

    /// Typed variant of [`resolve`](Self::resolve).
    pub async fn find<T: Component>(&self, name: &str) -> Result<Arc<T>, ComponentError> {
        let handle = self.resolve(name).await?;
        handle
            .downcast::<T>()
            .ok_or_else(|| ComponentError::TypeMismatch {
                component: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// `Err(LoadCancelled)` once the run is aborting. Long factories should
    /// call this between expensive steps.
    pub fn check_cancelled(&self) -> Result<(), ComponentError> {
        if self.deps.is_cancelled() {
            Err(ComponentError::LoadCancelled {
                component: self.component.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// This component's lifecycle token.
    ///
    /// Cancelled right before this component's `stop()`, or as soon as its
    /// construction ends without it becoming Ready. Components it resolved
    /// are stopped later, so their tokens are still live at that point.
    /// To notice a load abort inside a factory, use
    /// [`check_cancelled`](Self::check_cancelled).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.deps.lifecycle_token(&self.component).child_token()
    }

    /// Read-only view of the load, for components that report on it.
    pub fn load_monitor(&self) -> LoadMonitor {
        LoadMonitor::new(&self.deps)
    }
}

/// Weak handle to a run's record table.
///
/// Holding one does not keep the run alive; after the manager is dropped
/// every method returns `None`.
#[derive(Clone, Debug)]
pub struct LoadMonitor {
    deps: Weak<DependencyContext>,
}

impl LoadMonitor {
    pub(crate) fn new(deps: &Arc<DependencyContext>) -> Self {
        Self {
            deps: Arc::downgrade(deps),
        }
    }

    pub fn snapshot(&self) -> Option<ManagerSnapshot> {
        self.deps.upgrade().map(|d| d.snapshot())
    }

    pub fn run_state(&self) -> Option<RunState> {
        self.deps.upgrade().map(|d| d.run_state())
    }
}
