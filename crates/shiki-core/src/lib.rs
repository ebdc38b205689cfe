//! shiki-core
//!
//! Core building blocks for the Shiki process scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, process, history, handler, command, event, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, ProcessManager, LogStore, StateStore, など）
//! - **app**: アプリケーションロジック（watchdog, lease, recorder）
//! - **impls**: 実装（InMemoryQueueStore など開発・テスト用）
//!
//! # 全体フロー
//! 1. プロセスを enqueue → エージェントが poll で payload を lease
//! 2. エージェントが status/log/attachment をストリームで報告
//! 3. watchdog が 2 秒ごとにキューを監視し、異常終了・停滞・タイムアウトを検出
//! 4. 検出時はプロセスをマークするか、ハンドラプロセスを fork で起動

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
