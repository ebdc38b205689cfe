//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **Watchdog**: 2 秒間隔の監視ループ（handler dispatch / stalled /
//!   start-failure / timeout の 4 ワーカー）
//! - **LeaseService**: エージェント向け API（poll / update-status /
//!   append-log / upload-attachments）
//! - **EventRecorder**: ステップイベント記録の境界（kind でフィルタ）

pub mod watchdog;
pub mod lease;
pub mod recorder;

// 主要な型を再エクスポート
pub use self::watchdog::{CategorySets, Watchdog, WatchdogConfig, WatchdogHandle};
pub use self::lease::{JobChunk, JobType, LeaseService, ATTACHMENTS_DIR_NAME, PAYLOAD_CHUNK_SIZE};
pub use self::recorder::EventRecorder;
