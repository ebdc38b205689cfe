//! ProcessManager port - プロセスのライフサイクル操作
//!
//! Watchdog と LeaseService が使う協調者です。payload の実体化
//! （リポジトリ取り込み、シークレット復号）はこのコアの範囲外で、
//! 実装側の責務になります。

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{
    AgentId, InstanceId, ProcessEntry, ProcessKind, ProcessStatus, ProjectId, ShikiError, UserId,
};

/// A unit of work ready to be leased: the queue row plus the materialized
/// payload archive. The archive path is lease-scoped; the caller streams it
/// and deletes it afterwards.
#[derive(Debug)]
pub struct PayloadEntry {
    pub entry: ProcessEntry,
    pub archive: PathBuf,
}

/// Everything needed to spawn a handler child as a fork of its parent.
#[derive(Debug, Clone)]
pub struct ForkRequest {
    /// Fresh id for the child.
    pub instance_id: InstanceId,

    pub parent_instance_id: InstanceId,
    pub kind: ProcessKind,

    /// The handler flow the child starts with.
    pub entry_point: String,

    /// Inherited from the parent.
    pub project_id: Option<ProjectId>,
    pub initiator_id: Option<UserId>,
}

/// ProcessManager はプロセスの生成と状態遷移を担当
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Next ready payload, or None when nothing is queued.
    async fn next_payload(&self) -> Result<Option<PayloadEntry>, ShikiError>;

    /// Create and enqueue a forked child process. Called by the watchdog
    /// while the parent's row lock is still held.
    async fn start_fork(&self, req: ForkRequest) -> Result<(), ShikiError>;

    /// Apply an agent-reported status transition.
    async fn update_status(
        &self,
        instance_id: InstanceId,
        agent_id: AgentId,
        status: ProcessStatus,
    ) -> Result<(), ShikiError>;
}
