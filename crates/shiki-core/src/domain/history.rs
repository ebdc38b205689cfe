//! Append-only status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InstanceId, ProcessStatus};

/// One status transition of a process.
///
/// Entries are immutable and never deleted. The timeout worker derives
/// "time since last entered RUNNING" from the newest Running entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub instance_id: InstanceId,
    pub status: ProcessStatus,
    pub change_date: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(instance_id: InstanceId, status: ProcessStatus, change_date: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            status,
            change_date,
        }
    }
}
