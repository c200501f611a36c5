//! Error types produced while loading components.
//!
//! - [`ComponentError`] is what a single record settles with, or what a
//!   single `resolve` call returns.
//! - [`LoadError`] is the aggregate surfaced to the process entry point when
//!   a run aborts.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::state::ComponentState;

#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component's own factory returned an error.
    #[error("component '{component}' failed to construct")]
    Factory {
        component: String,
        #[source]
        source: anyhow::Error,
    },
    /// The requested dependency settled as Failed or Cancelled.
    #[error("component '{requester}' cannot use '{dependency}': {reason}")]
    DependencyUnavailable {
        requester: String,
        dependency: String,
        reason: String,
    },
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("component '{requester}' requested '{dependency}', which is disabled by load-enabled: false")]
    ComponentDisabled {
        requester: String,
        dependency: String,
    },
    #[error("component '{component}' did not finish construction within {timeout:?}")]
    ConstructionTimeout {
        component: String,
        timeout: Duration,
    },
    /// Raised to every in-flight lookup once the run is aborting.
    #[error("loading of '{component}' was cancelled because component loading is aborting")]
    LoadCancelled { component: String },
    #[error("component '{requester}' requested unknown component '{dependency}'")]
    UnknownComponent {
        requester: String,
        dependency: String,
    },
    #[error("component '{component}' is not a {expected}")]
    TypeMismatch {
        component: String,
        expected: &'static str,
    },
    #[error("component '{component}' has already settled as {state}")]
    AlreadySettled {
        component: String,
        state: ComponentState,
    },
    #[error("construction of '{component}' panicked: {message}")]
    Panicked { component: String, message: String },
    #[error("{hook} failed for component '{component}'")]
    Hook {
        component: String,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ComponentError {
    /// Short stable label for logs and statistics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::Factory { .. } => "factory_error",
            ComponentError::DependencyUnavailable { .. } => "dependency_unavailable",
            ComponentError::CyclicDependency { .. } => "cyclic_dependency",
            ComponentError::ComponentDisabled { .. } => "component_disabled",
            ComponentError::ConstructionTimeout { .. } => "construction_timeout",
            ComponentError::LoadCancelled { .. } => "load_cancelled",
            ComponentError::UnknownComponent { .. } => "unknown_component",
            ComponentError::TypeMismatch { .. } => "type_mismatch",
            ComponentError::AlreadySettled { .. } => "already_settled",
            ComponentError::Panicked { .. } => "panicked",
            ComponentError::Hook { .. } => "hook_failed",
        }
    }

    /// Errors that only say "someone else failed": the record holding one is
    /// a bystander, not a root cause.
    pub fn is_cascade(&self) -> bool {
        matches!(
            self,
            ComponentError::LoadCancelled { .. } | ComponentError::DependencyUnavailable { .. }
        )
    }

    /// The message together with every `source()` below it, joined by ": ".
    pub fn chain(&self) -> String {
        error_chain(self)
    }
}

/// Render an error and its sources on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // anyhow context layers repeat their inner message through source()
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

/// A component that settled as Failed, with the error that caused it.
#[derive(Debug)]
pub struct FailedComponent {
    pub name: String,
    pub error: ComponentError,
}

/// A component that never finished because the run was aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledComponent {
    pub name: String,
    pub reason: String,
}

/// Aggregate outcome of an aborted run.
///
/// Lists every root cause (failed components, in the order they settled) and
/// every bystander that was cancelled as a consequence.
#[derive(Debug, Default)]
pub struct LoadError {
    pub failed: Vec<FailedComponent>,
    pub cancelled: Vec<CancelledComponent>,
}

impl LoadError {
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn cancelled_names(&self) -> Vec<&str> {
        self.cancelled.iter().map(|c| c.name.as_str()).collect()
    }

    /// First failure whose error matches `pred`.
    pub fn find_failure(&self, pred: impl Fn(&ComponentError) -> bool) -> Option<&FailedComponent> {
        self.failed.iter().find(|f| pred(&f.error))
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to load components: {} failed, {} cancelled",
            self.failed.len(),
            self.cancelled.len()
        )?;
        for failed in &self.failed {
            write!(f, "\n  failed    {}: {}", failed.name, failed.error.chain())?;
        }
        for cancelled in &self.cancelled {
            write!(f, "\n  cancelled {}: {}", cancelled.name, cancelled.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadError {}
