//! In-memory queue store implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::{
    AgentId, InstanceId, ProcessEntry, ProcessStatus, ShikiError, StatusHistoryEntry,
};
use crate::ports::{ClaimPredicate, Clock, QueueReader, QueueStore, QueueTx};

/// In-memory queue state.
///
/// Design:
/// - `rows` is the single source of truth for process entries.
/// - `history` is append-only; one vector per instance, in change order.
/// - `locks` maps a row to the transaction currently holding it. A row in
///   this map is invisible to other claimants (skip-locked).
struct QueueState {
    rows: HashMap<InstanceId, ProcessEntry>,
    history: HashMap<InstanceId, Vec<StatusHistoryEntry>>,
    locks: HashMap<InstanceId, u64>,
    next_tx_id: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            history: HashMap::new(),
            locks: HashMap::new(),
            next_tx_id: 1,
        }
    }

    fn record_history(&mut self, entry: StatusHistoryEntry) {
        self.history
            .entry(entry.instance_id)
            .or_default()
            .push(entry);
    }
}

impl QueueReader for QueueState {
    fn children_of(&self, parent: InstanceId) -> Vec<ProcessEntry> {
        self.rows
            .values()
            .filter(|r| r.parent_instance_id == Some(parent))
            .cloned()
            .collect()
    }

    fn latest_running_at(&self, instance_id: InstanceId) -> Option<chrono::DateTime<chrono::Utc>> {
        self.history.get(&instance_id).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| e.status == ProcessStatus::Running)
                .map(|e| e.change_date)
        })
    }
}

/// In-memory queue store.
///
/// The mutex is held only for short, synchronous sections and never across
/// an await; transactions buffer their mutations instead of holding the
/// guard open.
pub struct InMemoryQueueStore {
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            clock,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Observability hook: a point-in-time copy of every row.
    pub async fn snapshot(&self) -> Vec<ProcessEntry> {
        let state = self.lock_state();
        let mut rows: Vec<ProcessEntry> = state.rows.values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at, r.instance_id));
        rows
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn begin(&self) -> Result<Box<dyn QueueTx>, ShikiError> {
        let tx_id = {
            let mut state = self.lock_state();
            let id = state.next_tx_id;
            state.next_tx_id += 1;
            id
        };

        Ok(Box::new(InMemoryQueueTx {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            tx_id,
            locked: Vec::new(),
            pending: Vec::new(),
            done: false,
        }))
    }

    async fn insert(&self, entry: ProcessEntry) -> Result<(), ShikiError> {
        let mut state = self.lock_state();
        if state.rows.contains_key(&entry.instance_id) {
            return Err(ShikiError::Storage(format!(
                "duplicate instance id: {}",
                entry.instance_id
            )));
        }

        let history =
            StatusHistoryEntry::new(entry.instance_id, entry.status, entry.last_updated_at);
        state.rows.insert(entry.instance_id, entry);
        state.record_history(history);
        Ok(())
    }

    async fn update_status(
        &self,
        instance_id: InstanceId,
        agent_id: Option<AgentId>,
        status: ProcessStatus,
    ) -> Result<(), ShikiError> {
        let now = self.clock.now();
        let mut state = self.lock_state();

        let row = state
            .rows
            .get_mut(&instance_id)
            .ok_or(ShikiError::ProcessNotFound(instance_id))?;
        row.apply_status(agent_id, status, now);

        state.record_history(StatusHistoryEntry::new(instance_id, status, now));
        Ok(())
    }

    async fn dequeue_next(&self) -> Result<Option<ProcessEntry>, ShikiError> {
        let now = self.clock.now();
        let mut state = self.lock_state();

        let next = state
            .rows
            .values()
            .filter(|r| {
                r.status == ProcessStatus::Enqueued && !state.locks.contains_key(&r.instance_id)
            })
            .min_by_key(|r| (r.created_at, r.instance_id))
            .map(|r| r.instance_id);

        let Some(instance_id) = next else {
            return Ok(None);
        };

        let row = state
            .rows
            .get_mut(&instance_id)
            .ok_or(ShikiError::ProcessNotFound(instance_id))?;
        row.status = ProcessStatus::Starting;
        row.touch(now);
        let updated = row.clone();

        state.record_history(StatusHistoryEntry::new(
            instance_id,
            ProcessStatus::Starting,
            now,
        ));
        Ok(Some(updated))
    }

    async fn get(&self, instance_id: InstanceId) -> Result<Option<ProcessEntry>, ShikiError> {
        let state = self.lock_state();
        Ok(state.rows.get(&instance_id).cloned())
    }

    async fn history(&self, instance_id: InstanceId) -> Result<Vec<StatusHistoryEntry>, ShikiError> {
        let state = self.lock_state();
        Ok(state.history.get(&instance_id).cloned().unwrap_or_default())
    }
}

/// A buffered status transition.
struct PendingUpdate {
    instance_id: InstanceId,
    agent_id: Option<AgentId>,
    status: ProcessStatus,
}

/// Transaction over the in-memory store.
///
/// Rows claimed here stay locked until `commit`/`rollback`; dropping the
/// transaction without committing releases the locks and discards the
/// buffered updates, so a crashed watchdog pass leaves no partial state.
struct InMemoryQueueTx {
    state: Arc<Mutex<QueueState>>,
    clock: Arc<dyn Clock>,
    tx_id: u64,
    locked: Vec<InstanceId>,
    pending: Vec<PendingUpdate>,
    done: bool,
}

impl InMemoryQueueTx {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release_locks(state: &mut QueueState, tx_id: u64) {
        state.locks.retain(|_, owner| *owner != tx_id);
    }
}

#[async_trait]
impl QueueTx for InMemoryQueueTx {
    async fn claim(
        &mut self,
        predicate: ClaimPredicate,
        max_rows: usize,
    ) -> Result<Vec<ProcessEntry>, ShikiError> {
        let claimed = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            // Oldest first, like the real store's ORDER BY created_at.
            let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, InstanceId)> = state
                .rows
                .values()
                .filter(|r| !state.locks.contains_key(&r.instance_id))
                .map(|r| (r.created_at, r.instance_id))
                .collect();
            candidates.sort();

            let mut claimed = Vec::new();
            for (_, instance_id) in candidates {
                if claimed.len() >= max_rows {
                    break;
                }
                let row = &state.rows[&instance_id];
                if predicate(row, &*state) {
                    claimed.push(row.clone());
                }
            }

            for row in &claimed {
                state.locks.insert(row.instance_id, self.tx_id);
            }
            claimed
        };

        self.locked.extend(claimed.iter().map(|r| r.instance_id));
        Ok(claimed)
    }

    async fn update_agent_and_status(
        &mut self,
        instance_id: InstanceId,
        agent_id: Option<AgentId>,
        status: ProcessStatus,
    ) -> Result<(), ShikiError> {
        if !self.locked.contains(&instance_id) {
            return Err(ShikiError::Storage(format!(
                "row not claimed by this transaction: {instance_id}"
            )));
        }

        self.pending.push(PendingUpdate {
            instance_id,
            agent_id,
            status,
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ShikiError> {
        let now = self.clock.now();
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.lock_state();

        for update in pending {
            let Some(row) = state.rows.get_mut(&update.instance_id) else {
                continue;
            };
            row.apply_status(update.agent_id, update.status, now);
            state.record_history(StatusHistoryEntry::new(
                update.instance_id,
                update.status,
                now,
            ));
        }

        Self::release_locks(&mut state, self.tx_id);
        drop(state);
        self.done = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // Drop releases the locks and discards pending updates.
    }
}

impl Drop for InMemoryQueueTx {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::release_locks(&mut state, self.tx_id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use ulid::Ulid;

    use super::*;
    use crate::domain::ProcessKind;
    use crate::ports::FixedClock;

    fn store_with_clock() -> (InMemoryQueueStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let store = InMemoryQueueStore::new(clock.clone());
        (store, clock)
    }

    fn failed_entry(clock: &FixedClock) -> ProcessEntry {
        let mut e = ProcessEntry::new(
            InstanceId::from_ulid(Ulid::new()),
            ProcessKind::Default,
            clock.now(),
        );
        e.status = ProcessStatus::Failed;
        e
    }

    fn any_row() -> ClaimPredicate {
        Box::new(|_, _| true)
    }

    #[tokio::test]
    async fn concurrent_claims_receive_disjoint_rows() {
        let (store, clock) = store_with_clock();
        for _ in 0..5 {
            store.insert(failed_entry(&clock)).await.unwrap();
        }

        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();

        let a = tx1.claim(any_row(), 3).await.unwrap();
        let b = tx2.claim(any_row(), 3).await.unwrap();

        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
        for row in &a {
            assert!(!b.iter().any(|r| r.instance_id == row.instance_id));
        }

        tx1.rollback().await;
        tx2.rollback().await;
    }

    #[tokio::test]
    async fn rollback_makes_rows_claimable_again() {
        let (store, clock) = store_with_clock();
        let entry = failed_entry(&clock);
        let id = entry.instance_id;
        store.insert(entry).await.unwrap();

        let mut tx1 = store.begin().await.unwrap();
        assert_eq!(tx1.claim(any_row(), 1).await.unwrap().len(), 1);

        // Locked: a concurrent claim sees nothing.
        let mut tx2 = store.begin().await.unwrap();
        assert!(tx2.claim(any_row(), 1).await.unwrap().is_empty());
        tx2.rollback().await;

        tx1.rollback().await;

        let mut tx3 = store.begin().await.unwrap();
        let rows = tx3.claim(any_row(), 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instance_id, id);
        tx3.rollback().await;
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let (store, clock) = store_with_clock();
        store.insert(failed_entry(&clock)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.claim(any_row(), 1).await.unwrap().len(), 1);
            // Dropped without commit.
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.claim(any_row(), 1).await.unwrap().len(), 1);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn commit_applies_updates_and_history() {
        let (store, clock) = store_with_clock();
        let mut entry = failed_entry(&clock);
        entry.status = ProcessStatus::Running;
        entry.last_agent_id = Some(AgentId::new("agent-1"));
        let id = entry.instance_id;
        store.insert(entry).await.unwrap();

        clock.advance(Duration::seconds(5));

        let mut tx = store.begin().await.unwrap();
        let rows = tx.claim(any_row(), 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        tx.update_agent_and_status(id, None, ProcessStatus::Failed)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, ProcessStatus::Failed);
        assert_eq!(row.last_agent_id, None);
        assert_eq!(row.last_updated_at, clock.now());

        let history = store.history(id).await.unwrap();
        assert_eq!(history.last().unwrap().status, ProcessStatus::Failed);

        // Row is claimable again after commit.
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.claim(any_row(), 1).await.unwrap().len(), 1);
        tx.rollback().await;
    }

    #[tokio::test]
    async fn updating_an_unclaimed_row_is_an_error() {
        let (store, clock) = store_with_clock();
        let entry = failed_entry(&clock);
        let id = entry.instance_id;
        store.insert(entry).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update_agent_and_status(id, None, ProcessStatus::Failed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not claimed"));
        tx.rollback().await;
    }

    #[tokio::test]
    async fn dequeue_next_picks_oldest_and_marks_starting() {
        let (store, clock) = store_with_clock();

        let first = ProcessEntry::new(
            InstanceId::from_ulid(Ulid::new()),
            ProcessKind::Default,
            clock.now(),
        );
        let first_id = first.instance_id;
        store.insert(first).await.unwrap();

        clock.advance(Duration::seconds(1));
        let second = ProcessEntry::new(
            InstanceId::from_ulid(Ulid::new()),
            ProcessKind::Default,
            clock.now(),
        );
        store.insert(second).await.unwrap();

        let row = store.dequeue_next().await.unwrap().unwrap();
        assert_eq!(row.instance_id, first_id);
        assert_eq!(row.status, ProcessStatus::Starting);

        let history = store.history(first_id).await.unwrap();
        assert_eq!(
            history.last().unwrap().status,
            ProcessStatus::Starting
        );

        // Only the second row remains enqueued.
        let row = store.dequeue_next().await.unwrap().unwrap();
        assert_ne!(row.instance_id, first_id);
        assert!(store.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_running_at_tracks_the_newest_running_episode() {
        let (store, clock) = store_with_clock();
        let entry = failed_entry(&clock);
        let id = entry.instance_id;
        store.insert(entry).await.unwrap();

        clock.advance(Duration::seconds(10));
        store
            .update_status(id, Some(AgentId::new("a")), ProcessStatus::Running)
            .await
            .unwrap();
        let first_running = clock.now();

        clock.advance(Duration::seconds(10));
        store
            .update_status(id, Some(AgentId::new("a")), ProcessStatus::Suspended)
            .await
            .unwrap();

        clock.advance(Duration::seconds(10));
        store
            .update_status(id, Some(AgentId::new("a")), ProcessStatus::Running)
            .await
            .unwrap();
        let second_running = clock.now();
        assert_ne!(first_running, second_running);

        let mut tx = store.begin().await.unwrap();
        let observed = std::sync::Arc::new(std::sync::Mutex::new(None));
        let observed_in = observed.clone();
        let rows = tx
            .claim(
                Box::new(move |row, reader| {
                    *observed_in.lock().unwrap() = reader.latest_running_at(row.instance_id);
                    true
                }),
                1,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(*observed.lock().unwrap(), Some(second_running));
        tx.rollback().await;
    }
}
