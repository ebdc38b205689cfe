//! FsLogStore - プロセスごとの追記専用ログファイル

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::domain::{InstanceId, ShikiError};
use crate::ports::ProcessLogStore;

/// One append-only `{instance_id}.log` file per process.
pub struct FsLogStore {
    root: PathBuf,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn log_path(&self, instance_id: InstanceId) -> PathBuf {
        self.root.join(format!("{instance_id}.log"))
    }
}

#[async_trait]
impl ProcessLogStore for FsLogStore {
    async fn append(&self, instance_id: InstanceId, data: &[u8]) -> Result<(), ShikiError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(instance_id))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn warn(&self, instance_id: InstanceId, message: &str) -> Result<(), ShikiError> {
        let line = format!("WARN: {message}\n");
        self.append(instance_id, line.as_bytes()).await
    }
}
