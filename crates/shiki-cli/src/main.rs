use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use shiki_core::app::{LeaseService, Watchdog, WatchdogConfig};
use shiki_core::domain::{AgentId, ON_FAILURE_FLOW};
use shiki_core::impls::{
    EnqueueRequest, FsLogStore, FsStateStore, InMemoryCommandQueue, InMemoryQueueStore,
    LocalProcessManager,
};
use shiki_core::ports::{AgentCommandQueue, SystemClock, UlidGenerator};

/// 小さな end-to-end デモ：
/// 1. onFailure 付きのプロセスを 1 件 enqueue
/// 2. 「エージェント」が poll で payload を受け取り、実行に失敗したと報告
/// 3. watchdog が FAILED を検出して onFailure ハンドラ子プロセスを fork
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let work_dir = tempfile::tempdir().expect("temp dir");

    // (A) 依存をワイヤリング
    let clock = Arc::new(SystemClock);
    let queue = Arc::new(InMemoryQueueStore::new(clock.clone()));
    let ids = Arc::new(UlidGenerator::new(SystemClock));
    let manager = Arc::new(LocalProcessManager::new(
        queue.clone(),
        ids.clone(),
        clock.clone(),
        work_dir.path().join("stage"),
    ));
    let commands = Arc::new(InMemoryCommandQueue::new());
    let logs = Arc::new(FsLogStore::new(work_dir.path().join("logs")));
    let state = Arc::new(FsStateStore::new(work_dir.path().join("state")));

    std::fs::create_dir_all(work_dir.path().join("stage")).expect("stage dir");

    let lease = LeaseService::new(manager.clone(), logs.clone(), state);

    // (B) watchdog を短い間隔で起動（デモ用）
    let watchdog = Arc::new(Watchdog::new(
        WatchdogConfig {
            poll_interval: Duration::from_millis(200),
            ..Default::default()
        },
        queue.clone(),
        manager.clone(),
        commands.clone(),
        logs,
        ids,
        clock,
    ));
    let watchdog_handle = watchdog.spawn();

    // (C) プロセス投入
    let instance_id = manager
        .enqueue(EnqueueRequest {
            handlers: HashSet::from([ON_FAILURE_FLOW.to_string()]),
            entry_point: Some("main".to_string()),
            payload: b"demo payload archive".to_vec(),
            ..Default::default()
        })
        .await
        .expect("enqueue");
    tracing::info!(instance = %instance_id, "enqueued");

    // (D) エージェント側：poll して payload を受け取り、失敗を報告
    let agent = AgentId::new("demo-agent");
    let mut rx = lease.poll().await.expect("poll");
    let mut total = 0usize;
    while let Some(chunk) = rx.recv().await {
        total += chunk.data.len();
    }
    tracing::info!(bytes = total, "agent received the payload");

    lease
        .update_status(agent.clone(), instance_id, "RUNNING")
        .await
        .expect("status RUNNING");
    lease
        .append_log(instance_id, b"step one... boom\n")
        .await
        .expect("append log");
    lease
        .update_status(agent.clone(), instance_id, "FAILED")
        .await
        .expect("status FAILED");

    // (E) watchdog がハンドラを fork するのを待つ
    sleep(Duration::from_secs(1)).await;

    for entry in queue.snapshot().await {
        tracing::info!(
            instance = %entry.instance_id,
            kind = %entry.kind,
            status = %entry.status,
            parent = ?entry.parent_instance_id,
            "queue row"
        );
    }

    if let Some(command) = commands.take_for_agent(&agent).await.expect("commands") {
        tracing::info!(?command, "pending agent command");
    }

    watchdog_handle.shutdown_and_join().await;
}
