//! Handler dispatch configuration.
//!
//! # 設計原則
//! - 「異常ステータス → ハンドラフロー → ハンドラ種別 → 最大試行回数」の表は
//!   プレーンな設定データとして毎パス参照する（分岐ロジックに埋め込まない）
//! - 新しいハンドラ種別はこの表に行を足すだけで追加できる

use super::{ProcessKind, ProcessStatus};

/// Flow invoked when a process fails.
pub const ON_FAILURE_FLOW: &str = "onFailure";

/// Flow invoked when a process is cancelled.
pub const ON_CANCEL_FLOW: &str = "onCancel";

/// Flow invoked when a process times out.
pub const ON_TIMEOUT_FLOW: &str = "onTimeout";

/// Maps an abnormal terminal status to the handler flow to invoke, the kind
/// of handler process to spawn, and a retry ceiling.
#[derive(Debug, Clone)]
pub struct PollEntry {
    /// The abnormal terminal status this entry reacts to.
    pub status: ProcessStatus,

    /// Name of the handler flow the child process starts with.
    pub flow: &'static str,

    /// Kind assigned to spawned handler children.
    pub handler_kind: ProcessKind,

    /// Maximum number of handler children of `handler_kind` per parent.
    pub max_tries: usize,
}

impl PollEntry {
    pub fn new(
        status: ProcessStatus,
        flow: &'static str,
        handler_kind: ProcessKind,
        max_tries: usize,
    ) -> Self {
        Self {
            status,
            flow,
            handler_kind,
            max_tries,
        }
    }
}

/// The shipped dispatch table.
pub fn default_poll_entries() -> Vec<PollEntry> {
    vec![
        PollEntry::new(
            ProcessStatus::Failed,
            ON_FAILURE_FLOW,
            ProcessKind::FailureHandler,
            3,
        ),
        PollEntry::new(
            ProcessStatus::Cancelled,
            ON_CANCEL_FLOW,
            ProcessKind::CancelHandler,
            3,
        ),
        PollEntry::new(
            ProcessStatus::TimedOut,
            ON_TIMEOUT_FLOW,
            ProcessKind::TimeoutHandler,
            3,
        ),
    ]
}
