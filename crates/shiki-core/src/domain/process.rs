//! Process queue row: identity, lineage and scheduling metadata.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AgentId, InstanceId, ProcessKind, ProcessStatus, ProjectId, UserId};

/// One row of the process queue.
///
/// Design:
/// - This is the "single source of truth" for a process's scheduling state.
/// - All state transitions go through the queue store so the status history
///   stays in sync with `status`.
/// - The materialized payload archive is lease-scoped and never part of the
///   row; see the process manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub instance_id: InstanceId,
    pub project_id: Option<ProjectId>,
    pub initiator_id: Option<UserId>,

    /// Set for forked/handler processes; always references a Default-kind parent.
    pub parent_instance_id: Option<InstanceId>,

    pub kind: ProcessKind,
    pub status: ProcessStatus,

    /// Configured execution timeout in seconds, measured per running episode.
    pub timeout: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    /// The agent that last touched this process, if any.
    pub last_agent_id: Option<AgentId>,

    /// Handler flow names configured for this process (e.g. "onFailure").
    pub handlers: HashSet<String>,

    /// Flow to start with. Handler children carry the handler flow here.
    pub entry_point: Option<String>,
}

impl ProcessEntry {
    pub fn new(instance_id: InstanceId, kind: ProcessKind, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            project_id: None,
            initiator_id: None,
            parent_instance_id: None,
            kind,
            status: ProcessStatus::Enqueued,
            timeout: None,
            created_at: now,
            last_updated_at: now,
            last_agent_id: None,
            handlers: HashSet::new(),
            entry_point: None,
        }
    }

    /// Apply a status transition, recording the reporting agent (None clears
    /// the assignment) and touching `last_updated_at`.
    pub fn apply_status(
        &mut self,
        agent_id: Option<AgentId>,
        status: ProcessStatus,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.last_agent_id = agent_id;
        self.last_updated_at = now;
    }

    /// Touch `last_updated_at` without changing the status (heartbeat).
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated_at = now;
    }
}
