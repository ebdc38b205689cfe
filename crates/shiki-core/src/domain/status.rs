//! Process status machine and process kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ShikiError;

/// Status of a queued process.
///
/// State transitions (one execution attempt):
/// - Enqueued -> Starting -> Running -> Finished/Failed/Cancelled/TimedOut
/// - Running -> Suspended -> Resuming -> Running (resume flow)
///
/// Re-entering Running after a resume starts a fresh "running episode";
/// timeout accounting is measured from the latest Running transition.
///
/// Design note: Using an enum ensures exhaustive matching and prevents invalid states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Waiting in the queue for an agent.
    Enqueued,

    /// Input bundle is being materialized.
    Preparing,

    /// Handed to an agent, not yet confirmed running.
    Starting,

    /// Confirmed running on an agent.
    Running,

    /// Resuming after a suspension, not yet confirmed running.
    Resuming,

    /// Suspended, waiting for an external event.
    Suspended,

    /// Completed successfully.
    Finished,

    /// Completed with an error (or declared lost by the watchdog).
    Failed,

    /// Cancelled by a user or an agent.
    Cancelled,

    /// Killed by the watchdog after blowing its deadline.
    TimedOut,
}

impl ProcessStatus {
    /// Is this a terminal status for the current execution attempt?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Finished
                | ProcessStatus::Failed
                | ProcessStatus::Cancelled
                | ProcessStatus::TimedOut
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Enqueued => "ENQUEUED",
            ProcessStatus::Preparing => "PREPARING",
            ProcessStatus::Starting => "STARTING",
            ProcessStatus::Running => "RUNNING",
            ProcessStatus::Resuming => "RESUMING",
            ProcessStatus::Suspended => "SUSPENDED",
            ProcessStatus::Finished => "FINISHED",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Cancelled => "CANCELLED",
            ProcessStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Kind of a queued process.
///
/// Handler kinds are spawned by the watchdog in reaction to a parent
/// process reaching an abnormal terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// A plain process started by a user.
    Default,

    /// An onFailure handler child.
    FailureHandler,

    /// An onCancel handler child.
    CancelHandler,

    /// An onTimeout handler child.
    TimeoutHandler,
}

impl ProcessKind {
    pub fn is_handler(self) -> bool {
        !matches!(self, ProcessKind::Default)
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessKind::Default => "DEFAULT",
            ProcessKind::FailureHandler => "FAILURE_HANDLER",
            ProcessKind::CancelHandler => "CANCEL_HANDLER",
            ProcessKind::TimeoutHandler => "TIMEOUT_HANDLER",
        };
        f.write_str(s)
    }
}

/// Coarse process status as reported by an agent over the lease protocol.
///
/// The wire value is a plain string; anything outside the four known values
/// is a protocol violation and must be rejected at the boundary without
/// touching the stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentProcessStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentProcessStatus {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, ShikiError> {
        match s {
            "RUNNING" => Ok(AgentProcessStatus::Running),
            "COMPLETED" => Ok(AgentProcessStatus::Completed),
            "FAILED" => Ok(AgentProcessStatus::Failed),
            "CANCELLED" => Ok(AgentProcessStatus::Cancelled),
            other => Err(ShikiError::UnsupportedAgentStatus(other.to_string())),
        }
    }
}

impl From<AgentProcessStatus> for ProcessStatus {
    /// COMPLETED maps to FINISHED, the rest pass through by name.
    fn from(s: AgentProcessStatus) -> Self {
        match s {
            AgentProcessStatus::Running => ProcessStatus::Running,
            AgentProcessStatus::Completed => ProcessStatus::Finished,
            AgentProcessStatus::Failed => ProcessStatus::Failed,
            AgentProcessStatus::Cancelled => ProcessStatus::Cancelled,
        }
    }
}
