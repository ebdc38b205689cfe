//! LeaseService - エージェント向けの 4 操作
//!
//! - **poll**: 次の payload を 512 KiB のチャンク列としてストリーム
//! - **update_status**: エージェントが報告した粗い状態を内部状態に変換して適用
//! - **append_log**: プロセスのログに生バイト列を追記（at-least-once）
//! - **upload_attachments**: zip を展開して添付状態を丸ごと置き換え
//!
//! 一時リソース（payload アーカイブ、展開ディレクトリ）はどの経路でも
//! 解放され、削除の失敗は警告止まりで操作の結果にはなりません。

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::domain::{AgentId, AgentProcessStatus, InstanceId, ShikiError};
use crate::ports::{ProcessLogStore, ProcessManager, ProcessStateStore};

/// Payload chunk size on the wire.
pub const PAYLOAD_CHUNK_SIZE: usize = 512 * 1024; // 512kb

/// Name of the per-instance attachments subtree.
pub const ATTACHMENTS_DIR_NAME: &str = "attachments";

/// Kind of leased work. Only runner jobs exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    Runner,
}

/// One chunk of a leased payload, in offset order.
#[derive(Debug, Clone)]
pub struct JobChunk {
    pub instance_id: InstanceId,
    pub job_type: JobType,
    pub data: Vec<u8>,
}

/// The agent-facing lease service.
pub struct LeaseService {
    manager: Arc<dyn ProcessManager>,
    logs: Arc<dyn ProcessLogStore>,
    state: Arc<dyn ProcessStateStore>,
}

impl LeaseService {
    pub fn new(
        manager: Arc<dyn ProcessManager>,
        logs: Arc<dyn ProcessLogStore>,
        state: Arc<dyn ProcessStateStore>,
    ) -> Self {
        Self {
            manager,
            logs,
            state,
        }
    }

    /// Lease the next available payload.
    ///
    /// When nothing is queued the returned channel is already closed: zero
    /// chunks, no error, and the caller applies its own backoff. Otherwise
    /// chunks arrive strictly in offset order and the backing temporary
    /// archive is deleted once the stream is over - also when the caller
    /// drops the receiver mid-stream.
    pub async fn poll(&self) -> Result<mpsc::Receiver<JobChunk>, ShikiError> {
        let (tx, rx) = mpsc::channel(4);

        let Some(payload) = self.manager.next_payload().await? else {
            return Ok(rx);
        };

        let logs = Arc::clone(&self.logs);
        tokio::spawn(async move {
            let instance_id = payload.entry.instance_id;

            if let Err(e) = stream_archive(instance_id, &payload.archive, &tx).await {
                tracing::warn!(instance = %instance_id, error = %e, "payload stream failed");
            }

            // Success, failure or abort: the lease-scoped archive goes away.
            if let Err(e) = tokio::fs::remove_file(&payload.archive).await {
                let message = format!(
                    "Unable to delete the temporary payload file: {} ({e})",
                    payload.archive.display()
                );
                if let Err(log_err) = logs.warn(instance_id, &message).await {
                    tracing::warn!(instance = %instance_id, error = %log_err, "cleanup warning lost");
                }
            }
        });

        Ok(rx)
    }

    /// Apply an agent-reported status.
    ///
    /// An unrecognized wire value is rejected here, before anything touches
    /// the stored status.
    pub async fn update_status(
        &self,
        agent_id: AgentId,
        instance_id: InstanceId,
        status: &str,
    ) -> Result<(), ShikiError> {
        let status = AgentProcessStatus::parse(status)?;
        self.manager
            .update_status(instance_id, agent_id, status.into())
            .await
    }

    /// Append a raw chunk to the process's log stream, in call order.
    pub async fn append_log(&self, instance_id: InstanceId, data: &[u8]) -> Result<(), ShikiError> {
        self.logs.append(instance_id, data).await
    }

    /// Replace the process's persisted attachments with the archive contents.
    pub async fn upload_attachments(
        &self,
        instance_id: InstanceId,
        data: &[u8],
    ) -> Result<(), ShikiError> {
        let tmp_in = tempfile::Builder::new()
            .prefix("attachments")
            .suffix(".zip")
            .tempfile()?;
        let tmp_dir = tempfile::Builder::new().prefix("attachments").tempdir()?;

        tokio::fs::write(tmp_in.path(), data).await?;

        let result = self
            .import_attachments(instance_id, tmp_in.path(), tmp_dir.path())
            .await;

        // Both temporary resources are released on every exit path; cleanup
        // failures are warnings, never the operation's result.
        if let Err(e) = tmp_dir.close() {
            tracing::warn!(instance = %instance_id, error = %e, "uploadAttachments cleanup error");
        }
        if let Err(e) = tmp_in.close() {
            tracing::warn!(instance = %instance_id, error = %e, "uploadAttachments cleanup error");
        }

        result?;
        tracing::info!(instance = %instance_id, "uploadAttachments done");
        Ok(())
    }

    async fn import_attachments(
        &self,
        instance_id: InstanceId,
        archive: &Path,
        staging: &Path,
    ) -> Result<(), ShikiError> {
        unzip(archive, staging).await?;

        // Replace, not merge: prior attachment state goes first.
        self.state.delete(instance_id, ATTACHMENTS_DIR_NAME).await?;
        self.state
            .import_dir(instance_id, ATTACHMENTS_DIR_NAME, staging)
            .await
    }
}

/// Stream the archive as fixed-size chunks. A failed send means the caller
/// dropped the receiver; the stream just stops.
async fn stream_archive(
    instance_id: InstanceId,
    path: &Path,
    tx: &mpsc::Sender<JobChunk>,
) -> Result<(), ShikiError> {
    let mut file = tokio::fs::File::open(path).await?;

    loop {
        let mut buf = vec![0u8; PAYLOAD_CHUNK_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        buf.truncate(filled);

        let chunk = JobChunk {
            instance_id,
            job_type: JobType::Runner,
            data: buf,
        };
        if tx.send(chunk).await.is_err() {
            break;
        }

        if filled < PAYLOAD_CHUNK_SIZE {
            break;
        }
    }

    Ok(())
}

async fn unzip(archive: &Path, dst: &Path) -> Result<(), ShikiError> {
    let archive = archive.to_path_buf();
    let dst = dst.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), ShikiError> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&dst)?;
        Ok(())
    })
    .await
    .map_err(|e| ShikiError::Archive(format!("unzip task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::ProcessStatus;
    use crate::impls::{
        EnqueueRequest, FsLogStore, FsStateStore, InMemoryQueueStore, LocalProcessManager,
    };
    use crate::ports::{FixedClock, ProcessStateStore, QueueStore, SystemClock, UlidGenerator};

    struct Harness {
        service: LeaseService,
        manager: Arc<LocalProcessManager>,
        queue: Arc<InMemoryQueueStore>,
        state: Arc<FsStateStore>,
        stage_dir: tempfile::TempDir,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let queue = Arc::new(InMemoryQueueStore::new(clock.clone()));
        let ids = Arc::new(UlidGenerator::new(SystemClock));

        let stage_dir = tempfile::tempdir().unwrap();
        let logs_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();

        let manager = Arc::new(LocalProcessManager::new(
            queue.clone(),
            ids,
            clock,
            stage_dir.path(),
        ));
        let state = Arc::new(FsStateStore::new(state_dir.path()));

        let service = LeaseService::new(
            manager.clone(),
            Arc::new(FsLogStore::new(logs_dir.path())),
            state.clone(),
        );

        Harness {
            service,
            manager,
            queue,
            state,
            stage_dir,
            _dirs: (logs_dir, state_dir),
        }
    }

    fn stage_dir_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.stage_dir.path()).unwrap().next().is_none()
    }

    async fn wait_until_stage_dir_is_empty(h: &Harness) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !stage_dir_is_empty(h) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("temporary payload archive was not deleted");
    }

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn empty_poll_completes_with_zero_chunks() {
        let h = harness();
        let mut rx = h.service.poll().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn poll_streams_ordered_fixed_size_chunks() {
        let h = harness();

        // 1500 KiB: two full chunks and a 476 KiB tail.
        let payload: Vec<u8> = (0..1500 * 1024).map(|i| (i % 251) as u8).collect();
        let id = h
            .manager
            .enqueue(EnqueueRequest {
                payload: payload.clone(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut rx = h.service.poll().await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.instance_id, id);
            assert_eq!(chunk.job_type, JobType::Runner);
            chunks.push(chunk.data);
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 512 * 1024);
        assert_eq!(chunks[1].len(), 512 * 1024);
        assert_eq!(chunks[2].len(), 476 * 1024);
        assert_eq!(chunks.concat(), payload);

        wait_until_stage_dir_is_empty(&h).await;
    }

    #[tokio::test]
    async fn aborted_stream_still_deletes_the_archive() {
        let h = harness();

        let payload = vec![7u8; 1500 * 1024];
        h.manager
            .enqueue(EnqueueRequest {
                payload,
                ..Default::default()
            })
            .await
            .unwrap();

        let mut rx = h.service.poll().await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.data.len(), 512 * 1024);
        drop(rx);

        wait_until_stage_dir_is_empty(&h).await;
    }

    #[tokio::test]
    async fn unknown_status_is_rejected_and_state_untouched() {
        let h = harness();
        let id = h.manager.enqueue(EnqueueRequest::default()).await.unwrap();

        let err = h
            .service
            .update_status(AgentId::new("a"), id, "PAUSED")
            .await
            .unwrap_err();
        assert!(matches!(err, ShikiError::UnsupportedAgentStatus(_)));

        let row = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, ProcessStatus::Enqueued);
        assert_eq!(row.last_agent_id, None);
    }

    #[tokio::test]
    async fn completed_maps_to_finished() {
        let h = harness();
        let id = h.manager.enqueue(EnqueueRequest::default()).await.unwrap();

        h.service
            .update_status(AgentId::new("a"), id, "COMPLETED")
            .await
            .unwrap();

        let row = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, ProcessStatus::Finished);
        assert_eq!(row.last_agent_id, Some(AgentId::new("a")));
    }

    #[tokio::test]
    async fn upload_replaces_prior_attachments() {
        let h = harness();
        let id = h.manager.enqueue(EnqueueRequest::default()).await.unwrap();

        let bundle_a = zip_bytes(&[("a.txt", b"a"), ("keep/inner.txt", b"x")]);
        h.service.upload_attachments(id, &bundle_a).await.unwrap();
        assert_eq!(
            h.state.list(id, ATTACHMENTS_DIR_NAME).await.unwrap(),
            vec!["a.txt".to_string(), "keep/inner.txt".to_string()]
        );

        // Replace, not merge.
        let bundle_b = zip_bytes(&[("b.txt", b"b")]);
        h.service.upload_attachments(id, &bundle_b).await.unwrap();
        assert_eq!(
            h.state.list(id, ATTACHMENTS_DIR_NAME).await.unwrap(),
            vec!["b.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn broken_archive_fails_but_releases_temp_resources() {
        let h = harness();
        let id = h.manager.enqueue(EnqueueRequest::default()).await.unwrap();

        let err = h
            .service
            .upload_attachments(id, b"this is not a zip")
            .await
            .unwrap_err();
        assert!(matches!(err, ShikiError::Archive(_)));

        // Nothing was imported.
        assert!(h.state.list(id, ATTACHMENTS_DIR_NAME).await.unwrap().is_empty());
    }
}
