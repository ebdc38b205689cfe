//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（キューのストレージ、プロセス状態、ログ、
//! エージェントコマンドなど）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - QueueStore が source of truth（正本）
//! - 排他制御は claim の skip-locked セマンティクスのみ（プロセス内ロック無し）
//! - 状態遷移と履歴記録は同一トランザクション内

pub mod clock;
pub mod id_generator;
pub mod queue_store;
pub mod process_manager;
pub mod log_store;
pub mod state_store;
pub mod command_queue;
pub mod event_sink;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_store::{ClaimPredicate, QueueReader, QueueStore, QueueTx};
pub use self::process_manager::{ForkRequest, PayloadEntry, ProcessManager};
pub use self::log_store::ProcessLogStore;
pub use self::state_store::ProcessStateStore;
pub use self::command_queue::AgentCommandQueue;
pub use self::event_sink::EventSink;
