//! ProcessLogStore port - プロセスごとのログストリーム
//!
//! watchdog の警告と lease 経由のログ追記は、どちらも対象プロセス
//! 自身のログに残ります。オペレータはプロセスのログと履歴だけで
//! 「なぜ FAILED / TIMED_OUT になったか」を再構成できます。

use async_trait::async_trait;

use crate::domain::{InstanceId, ShikiError};

/// Append-only, per-process log streams.
#[async_trait]
pub trait ProcessLogStore: Send + Sync {
    /// Append a raw chunk in call order. At-least-once: a retried call
    /// appends again, duplicates are the consumer's problem.
    async fn append(&self, instance_id: InstanceId, data: &[u8]) -> Result<(), ShikiError>;

    /// Append a formatted warning line.
    async fn warn(&self, instance_id: InstanceId, message: &str) -> Result<(), ShikiError>;
}
