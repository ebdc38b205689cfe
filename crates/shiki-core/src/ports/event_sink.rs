//! EventSink port - プロセスイベント記録の抽象化
//!
//! 送信は best-effort：転送エラーは呼び出し側で警告ログに落とし、
//! 実行中のプロセスへは決して伝播させません。

use async_trait::async_trait;

use crate::domain::{InstanceId, ProcessEvent, ShikiError};

/// EventSink はプロセスイベントを記録
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, instance_id: InstanceId, event: ProcessEvent) -> Result<(), ShikiError>;
}
