//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryQueueStore**: claim レイヤーを含むキューの正本
//! - **LocalProcessManager**: payload をローカルにステージする ProcessManager
//! - **FsLogStore / FsStateStore**: ファイルシステム上のログ・状態ストア
//! - **InMemoryCommandQueue**: エージェント宛コマンドのメールボックス
//! - **InMemoryEventSink**: 記録するだけのイベントシンク
//!
//! # 本番用実装
//! データベース・オブジェクトストレージを使う実装は別クレートに
//! 配置する想定です（QueueStore trait が seam）。

pub mod memory_queue;
pub mod process_manager;
pub mod fs_log;
pub mod fs_state;
pub mod memory_commands;
pub mod memory_events;

// 主要な型を再エクスポート
pub use self::memory_queue::InMemoryQueueStore;
pub use self::process_manager::{EnqueueRequest, LocalProcessManager};
pub use self::fs_log::FsLogStore;
pub use self::fs_state::FsStateStore;
pub use self::memory_commands::InMemoryCommandQueue;
pub use self::memory_events::InMemoryEventSink;
