//! Watchdog - キュー監視ループ
//!
//! 2 秒間隔で 4 つのワーカーを順に実行します。複数のスケジューラ
//! インスタンスが同じキューに対して並走してよく、正しさは claim の
//! skip-locked セマンティクスだけに依存します（リーダー選出なし）。
//!
//! # ワーカー
//! 1. handler dispatch: 異常終了した親にハンドラ子プロセスを fork
//! 2. stalled: ハートビートが途絶えた RUNNING を FAILED に
//! 3. start failure: STARTING/RESUMING で固まったプロセスを FAILED に
//! 4. timeout: 実行時間が設定値を超えた RUNNING を TIMED_OUT に
//!
//! 各ワーカーは自分のトランザクション内で claim → 更新を行い、エラー時は
//! ロールバックして次の tick で再試行します。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{
    AgentCommand, PollEntry, ProcessKind, ProcessStatus, ShikiError, default_poll_entries,
};
use crate::ports::{
    AgentCommandQueue, ClaimPredicate, Clock, ForkRequest, IdGenerator, ProcessLogStore,
    ProcessManager, QueueStore,
};

/// Watchdog tuning knobs. The ages are opaque operational values; the
/// workers only compare them against row timestamps.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Interval between ticks.
    pub poll_interval: std::time::Duration,

    /// How far back handler dispatch looks for abnormal parents.
    pub max_failure_handling_age: Duration,

    /// Heartbeat silence after which a RUNNING process counts as lost.
    pub max_stalled_age: Duration,

    /// How long a process may sit in STARTING/RESUMING.
    pub max_start_failure_age: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(2),
            max_failure_handling_age: Duration::days(3),
            max_stalled_age: Duration::minutes(1),
            max_start_failure_age: Duration::minutes(10),
        }
    }
}

/// Fixed category sets, built once at construction instead of scattering
/// status literals through the workers.
#[derive(Debug, Clone)]
pub struct CategorySets {
    /// Kinds eligible to have handlers dispatched for them.
    pub handled_kinds: Vec<ProcessKind>,

    /// The special handler kinds.
    pub special_handlers: Vec<ProcessKind>,

    /// Statuses that count as "still active" for handler mutual exclusion.
    pub active_statuses: Vec<ProcessStatus>,

    /// Statuses the stalled worker watches.
    pub stalled_statuses: Vec<ProcessStatus>,

    /// Statuses the start-failure worker watches.
    pub start_failure_statuses: Vec<ProcessStatus>,
}

impl Default for CategorySets {
    fn default() -> Self {
        Self {
            handled_kinds: vec![ProcessKind::Default],
            special_handlers: vec![
                ProcessKind::FailureHandler,
                ProcessKind::CancelHandler,
                ProcessKind::TimeoutHandler,
            ],
            active_statuses: vec![
                ProcessStatus::Suspended,
                ProcessStatus::Enqueued,
                ProcessStatus::Running,
                ProcessStatus::Preparing,
                ProcessStatus::Resuming,
            ],
            stalled_statuses: vec![ProcessStatus::Running],
            start_failure_statuses: vec![ProcessStatus::Starting, ProcessStatus::Resuming],
        }
    }
}

/// The periodic queue watchdog.
pub struct Watchdog {
    cfg: WatchdogConfig,
    entries: Vec<PollEntry>,
    sets: CategorySets,
    queue: Arc<dyn QueueStore>,
    manager: Arc<dyn ProcessManager>,
    commands: Arc<dyn AgentCommandQueue>,
    logs: Arc<dyn ProcessLogStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Watchdog {
    pub fn new(
        cfg: WatchdogConfig,
        queue: Arc<dyn QueueStore>,
        manager: Arc<dyn ProcessManager>,
        commands: Arc<dyn AgentCommandQueue>,
        logs: Arc<dyn ProcessLogStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            entries: default_poll_entries(),
            sets: CategorySets::default(),
            queue,
            manager,
            commands,
            logs,
            ids,
            clock,
        }
    }

    /// One watchdog pass. A failing worker is logged and does not stop the
    /// others; its transaction rolls back and the rows are retried on the
    /// next tick.
    pub async fn run_once(&self) {
        if let Err(e) = self.process_handlers().await {
            tracing::warn!(error = %e, "processHandlers failed");
        }
        if let Err(e) = self.process_stalled().await {
            tracing::warn!(error = %e, "processStalled failed");
        }
        if let Err(e) = self.process_start_failures().await {
            tracing::warn!(error = %e, "processStartFailures failed");
        }
        if let Err(e) = self.process_timed_out().await {
            tracing::warn!(error = %e, "processTimedOut failed");
        }
    }

    /// Spawn the fixed-interval loop. Shutdown stops taking new ticks; the
    /// tick in flight finishes first.
    pub fn spawn(self: Arc<Self>) -> WatchdogHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });

        WatchdogHandle { shutdown_tx, join }
    }

    async fn process_handlers(&self) -> Result<(), ShikiError> {
        let now = self.clock.now();
        let max_age = now - self.cfg.max_failure_handling_age;

        let mut tx = self.queue.begin().await?;

        for entry in &self.entries {
            let parents = tx
                .claim(handler_dispatch_predicate(entry, &self.sets, max_age), 1)
                .await?;

            for parent in parents {
                let child_id = self.ids.generate_instance_id();

                // The parent row stays locked through the fork; a failure
                // here aborts the transaction and releases the parent for a
                // later tick, still bounded by max_tries.
                self.manager
                    .start_fork(ForkRequest {
                        instance_id: child_id,
                        parent_instance_id: parent.instance_id,
                        kind: entry.handler_kind,
                        entry_point: entry.flow.to_string(),
                        project_id: parent.project_id,
                        initiator_id: parent.initiator_id,
                    })
                    .await?;

                tracing::info!(
                    child = %child_id,
                    parent = %parent.instance_id,
                    entry_point = entry.flow,
                    "processHandlers -> created a new child process"
                );
            }
        }

        tx.commit().await
    }

    async fn process_stalled(&self) -> Result<(), ShikiError> {
        let cutoff = self.clock.now() - self.cfg.max_stalled_age;
        self.fail_silent_processes(
            self.sets.stalled_statuses.clone(),
            cutoff,
            "Process stalled, no heartbeat within the stalled-age limit",
            "processStalled",
        )
        .await
    }

    async fn process_start_failures(&self) -> Result<(), ShikiError> {
        let cutoff = self.clock.now() - self.cfg.max_start_failure_age;
        self.fail_silent_processes(
            self.sets.start_failure_statuses.clone(),
            cutoff,
            "Process failed to start",
            "processStartFailures",
        )
        .await
    }

    /// Shared shape of the stalled and start-failure workers: claim one
    /// silent process, declare it lost.
    async fn fail_silent_processes(
        &self,
        statuses: Vec<ProcessStatus>,
        cutoff: DateTime<Utc>,
        message: &str,
        worker: &'static str,
    ) -> Result<(), ShikiError> {
        let mut tx = self.queue.begin().await?;

        let rows = tx
            .claim(
                Box::new(move |row, _| {
                    statuses.contains(&row.status) && row.last_updated_at < cutoff
                }),
                1,
            )
            .await?;

        for row in &rows {
            tx.update_agent_and_status(row.instance_id, None, ProcessStatus::Failed)
                .await?;
            self.logs.warn(row.instance_id, message).await?;
            tracing::info!(worker, instance = %row.instance_id, "marked as failed");
        }

        tx.commit().await
    }

    async fn process_timed_out(&self) -> Result<(), ShikiError> {
        let now = self.clock.now();

        let mut tx = self.queue.begin().await?;

        let rows = tx
            .claim(
                Box::new(move |row, reader| {
                    if row.status != ProcessStatus::Running {
                        return false;
                    }
                    let Some(timeout) = row.timeout else {
                        return false;
                    };
                    // Measured from the newest RUNNING transition: a resume
                    // restarts the window.
                    let Some(running_at) = reader.latest_running_at(row.instance_id) else {
                        return false;
                    };
                    now - running_at >= Duration::seconds(timeout as i64)
                }),
                1,
            )
            .await?;

        for row in rows {
            tx.update_agent_and_status(row.instance_id, None, ProcessStatus::TimedOut)
                .await?;

            if let Some(agent_id) = row.last_agent_id.clone() {
                let command = AgentCommand::cancel(
                    self.ids.generate_command_id(),
                    agent_id,
                    row.instance_id,
                );
                self.commands.insert(command).await?;
            }

            let limit = row.timeout.unwrap_or(0);
            self.logs
                .warn(
                    row.instance_id,
                    &format!("Process timed out ({limit}s limit)"),
                )
                .await?;
            tracing::info!(instance = %row.instance_id, "processTimedOut -> marked as timed out");
        }

        tx.commit().await
    }
}

/// Eligibility of a parent process for one dispatch-table entry.
fn handler_dispatch_predicate(
    entry: &PollEntry,
    sets: &CategorySets,
    max_age: DateTime<Utc>,
) -> ClaimPredicate {
    let entry = entry.clone();
    let handled_kinds = sets.handled_kinds.clone();
    let special_handlers = sets.special_handlers.clone();
    let active_statuses = sets.active_statuses.clone();

    Box::new(move |row, reader| {
        if !handled_kinds.contains(&row.kind) || row.status != entry.status {
            return false;
        }
        if row.created_at < max_age {
            return false;
        }
        if !row.handlers.contains(entry.flow) {
            return false;
        }

        let children = reader.children_of(row.instance_id);

        // A prior handler attempt of this kind already succeeded.
        if children
            .iter()
            .any(|c| c.kind == entry.handler_kind && c.status == ProcessStatus::Finished)
        {
            return false;
        }

        // Retry ceiling for this handler kind.
        let tries = children
            .iter()
            .filter(|c| c.kind == entry.handler_kind)
            .count();
        if tries >= entry.max_tries {
            return false;
        }

        // Global mutual exclusion: no active handler of any special kind.
        !children
            .iter()
            .any(|c| special_handlers.contains(&c.kind) && active_statuses.contains(&c.status))
    })
}

/// Handle of a spawned watchdog loop.
/// - `request_shutdown()` stops taking new ticks
/// - `shutdown_and_join()` waits for the loop to exit
pub struct WatchdogHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
