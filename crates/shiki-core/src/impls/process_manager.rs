//! LocalProcessManager - payload をローカルにステージする ProcessManager 実装
//!
//! 本物の payload 実体化（リポジトリ取り込み、シークレット復号）は
//! このコアの範囲外なので、enqueue 時に受け取ったアーカイブバイト列を
//! そのままステージします。fork は親の payload を引き継ぎます。

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::domain::{
    AgentId, InstanceId, ProcessEntry, ProcessKind, ProcessStatus, ProjectId, ShikiError, UserId,
};
use crate::ports::{Clock, ForkRequest, IdGenerator, PayloadEntry, ProcessManager, QueueStore};

/// Everything needed to enqueue a plain process.
#[derive(Debug, Default)]
pub struct EnqueueRequest {
    pub project_id: Option<ProjectId>,
    pub initiator_id: Option<UserId>,

    /// Execution timeout in seconds.
    pub timeout: Option<u64>,

    /// Handler flow names configured for this process.
    pub handlers: HashSet<String>,

    pub entry_point: Option<String>,

    /// The payload archive, as bytes.
    pub payload: Vec<u8>,
}

/// Process manager over the queue store with in-process payload staging.
pub struct LocalProcessManager {
    queue: Arc<dyn QueueStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,

    /// Staged payload bytes per instance.
    payloads: Mutex<HashMap<InstanceId, Vec<u8>>>,

    /// Where materialized archives are written before delivery.
    stage_dir: PathBuf,
}

impl LocalProcessManager {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        stage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            ids,
            clock,
            payloads: Mutex::new(HashMap::new()),
            stage_dir: stage_dir.into(),
        }
    }

    /// Enqueue a new plain process and stage its payload.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<InstanceId, ShikiError> {
        let instance_id = self.ids.generate_instance_id();

        let mut entry = ProcessEntry::new(instance_id, ProcessKind::Default, self.clock.now());
        entry.project_id = req.project_id;
        entry.initiator_id = req.initiator_id;
        entry.timeout = req.timeout;
        entry.handlers = req.handlers;
        entry.entry_point = req.entry_point;

        self.queue.insert(entry).await?;
        self.stage_payload(instance_id, req.payload);
        Ok(instance_id)
    }

    fn stage_payload(&self, instance_id: InstanceId, bytes: Vec<u8>) {
        let mut payloads = self.payloads.lock().unwrap_or_else(|e| e.into_inner());
        payloads.insert(instance_id, bytes);
    }

    fn staged_payload(&self, instance_id: InstanceId) -> Option<Vec<u8>> {
        let payloads = self.payloads.lock().unwrap_or_else(|e| e.into_inner());
        payloads.get(&instance_id).cloned()
    }
}

#[async_trait]
impl ProcessManager for LocalProcessManager {
    async fn next_payload(&self) -> Result<Option<PayloadEntry>, ShikiError> {
        let Some(entry) = self.queue.dequeue_next().await? else {
            return Ok(None);
        };

        let bytes = self.staged_payload(entry.instance_id).unwrap_or_default();

        // The archive is lease-scoped: kept past this call, deleted by the
        // lease service once the stream is over.
        let tmp = NamedTempFile::new_in(&self.stage_dir)?;
        let (mut file, path) = tmp
            .keep()
            .map_err(|e| ShikiError::Storage(format!("unable to keep payload archive: {e}")))?;
        file.write_all(&bytes)?;

        Ok(Some(PayloadEntry {
            entry,
            archive: path,
        }))
    }

    async fn start_fork(&self, req: ForkRequest) -> Result<(), ShikiError> {
        let now = self.clock.now();

        let mut child = ProcessEntry::new(req.instance_id, req.kind, now);
        child.parent_instance_id = Some(req.parent_instance_id);
        child.project_id = req.project_id;
        child.initiator_id = req.initiator_id;
        child.entry_point = Some(req.entry_point);
        // Handler children start with a cleared handler set.

        self.queue
            .insert(child)
            .await
            .map_err(|e| ShikiError::ForkFailed(e.to_string()))?;

        // The fork reuses the parent's staged payload.
        if let Some(bytes) = self.staged_payload(req.parent_instance_id) {
            self.stage_payload(req.instance_id, bytes);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        instance_id: InstanceId,
        agent_id: AgentId,
        status: ProcessStatus,
    ) -> Result<(), ShikiError> {
        self.queue
            .update_status(instance_id, Some(agent_id), status)
            .await
    }
}
