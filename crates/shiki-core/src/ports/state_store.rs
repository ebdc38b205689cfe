//! ProcessStateStore port - プロセスごとの永続ファイル

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{InstanceId, ShikiError};

/// Persistent per-process file trees (attachments, saved state).
#[async_trait]
pub trait ProcessStateStore: Send + Sync {
    /// Remove the named subtree wholesale. Removing a missing subtree is not
    /// an error.
    async fn delete(&self, instance_id: InstanceId, name: &str) -> Result<(), ShikiError>;

    /// Import a staging directory as the named subtree.
    async fn import_dir(
        &self,
        instance_id: InstanceId,
        name: &str,
        src: &Path,
    ) -> Result<(), ShikiError>;

    /// List file paths under the named subtree, relative to it.
    async fn list(&self, instance_id: InstanceId, name: &str) -> Result<Vec<String>, ShikiError>;
}
