//! QueueStore port - プロセスキューの正本（source of truth）
//!
//! QueueStore は以下を管理します：
//! - プロセス行（ProcessEntry）
//! - ステータス履歴（append-only）
//! - 行ロック（claim の排他制御）
//!
//! # 設計原則
//! - 状態遷移と履歴記録は同一トランザクション内
//! - claim は「select for update, skip locked」相当：並行する claim は
//!   互いに素な行集合を受け取り、ブロックもエラーもしない
//! - rollback した行は即座に再 claim 可能になる
//! - スケジューラ全体の排他制御はこのプリミティブのみ（プロセス内ロック無し）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AgentId, InstanceId, ProcessEntry, ProcessStatus, ShikiError, StatusHistoryEntry};

/// Read-only view handed to claim predicates.
///
/// Eligibility rules need to look past the candidate row itself: handler
/// dispatch consults child rows, the timeout worker consults the status
/// history. The reader exposes exactly those two queries.
pub trait QueueReader {
    /// All processes whose parent is `parent`.
    fn children_of(&self, parent: InstanceId) -> Vec<ProcessEntry>;

    /// Timestamp of the most recent transition into Running, if any.
    fn latest_running_at(&self, instance_id: InstanceId) -> Option<DateTime<Utc>>;
}

/// Row eligibility check used by `QueueTx::claim`.
pub type ClaimPredicate = Box<dyn Fn(&ProcessEntry, &dyn QueueReader) -> bool + Send>;

/// One storage transaction.
///
/// Design intent:
/// - `claim` locks rows for the lifetime of the transaction.
/// - Mutations are buffered and applied atomically at `commit`, together
///   with the matching status-history appends.
/// - Dropping the transaction without committing rolls it back: locks are
///   released and buffered mutations are discarded.
#[async_trait]
pub trait QueueTx: Send {
    /// Select up to `max_rows` rows matching `predicate`, oldest first,
    /// locking each selected row and silently skipping rows already locked
    /// by a concurrent claimant.
    async fn claim(
        &mut self,
        predicate: ClaimPredicate,
        max_rows: usize,
    ) -> Result<Vec<ProcessEntry>, ShikiError>;

    /// Buffer a status transition for a claimed row. `agent_id` replaces the
    /// row's agent assignment (None clears it).
    async fn update_agent_and_status(
        &mut self,
        instance_id: InstanceId,
        agent_id: Option<AgentId>,
        status: ProcessStatus,
    ) -> Result<(), ShikiError>;

    /// Apply buffered mutations and release all locks.
    async fn commit(self: Box<Self>) -> Result<(), ShikiError>;

    /// Discard buffered mutations and release all locks.
    async fn rollback(self: Box<Self>);
}

/// Queue port (interface).
///
/// The in-memory implementation is the development/test backend; this trait
/// is the seam for swapping in a database-backed store later.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Open a transaction for a claim-and-act sequence.
    async fn begin(&self) -> Result<Box<dyn QueueTx>, ShikiError>;

    /// Insert a new process row, recording its initial status in the history.
    async fn insert(&self, entry: ProcessEntry) -> Result<(), ShikiError>;

    /// Autocommit status transition used by collaborators (agent reports,
    /// enqueue-side transitions). Records the history entry in the same step.
    async fn update_status(
        &self,
        instance_id: InstanceId,
        agent_id: Option<AgentId>,
        status: ProcessStatus,
    ) -> Result<(), ShikiError>;

    /// Pick the oldest Enqueued process and move it to Starting, returning
    /// the updated row. Used by the process manager to hand work to agents.
    async fn dequeue_next(&self) -> Result<Option<ProcessEntry>, ShikiError>;

    async fn get(&self, instance_id: InstanceId) -> Result<Option<ProcessEntry>, ShikiError>;

    /// Full status history of a process, in append order.
    async fn history(&self, instance_id: InstanceId) -> Result<Vec<StatusHistoryEntry>, ShikiError>;
}
