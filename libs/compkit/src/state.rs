//! Lifecycle states and the read-only snapshot handed to reporters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of one component record.
///
/// `Pending -> Constructing -> {Ready | Failed | Cancelled}`; a pending record
/// may also go straight to `Cancelled` when the run aborts before its task
/// gets to claim it. The three settled states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Pending,
    Constructing,
    Ready,
    Failed,
    Cancelled,
}

impl ComponentState {
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ComponentState::Ready | ComponentState::Failed | ComponentState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentState::Pending => "pending",
            ComponentState::Constructing => "constructing",
            ComponentState::Ready => "ready",
            ComponentState::Failed => "failed",
            ComponentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager-level state of one run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Completed,
    Aborting,
    Aborted,
    /// Reverse teardown finished; no component is alive any more.
    Stopped,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Completed => "completed",
            RunState::Aborting => "aborting",
            RunState::Aborted => "aborted",
            RunState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one record.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub state: ComponentState,
    /// Position in the realized order; set once the record is Ready or Failed.
    pub construction_seq: Option<u64>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Error summary when Failed, cancellation reason when Cancelled.
    pub error: Option<String>,
    /// The instance has already been stopped and released.
    pub torn_down: bool,
}

/// Point-in-time view of a whole run, in registry order.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub run_id: Uuid,
    pub run_state: RunState,
    pub components: Vec<ComponentSnapshot>,
}

impl ManagerSnapshot {
    pub fn count(&self, state: ComponentState) -> usize {
        self.components.iter().filter(|c| c.state == state).count()
    }

    pub fn get(&self, name: &str) -> Option<&ComponentSnapshot> {
        self.components.iter().find(|c| c.name == name)
    }
}
