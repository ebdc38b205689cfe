//! FsStateStore - プロセスごとの永続ファイルツリー

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{InstanceId, ShikiError};
use crate::ports::ProcessStateStore;

/// Per-instance directories under a common root.
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn subtree(&self, instance_id: InstanceId, name: &str) -> PathBuf {
        self.root.join(instance_id.to_string()).join(name)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn list_tree(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            list_tree(root, &entry.path(), out)?;
        } else if let Ok(rel) = entry.path().strip_prefix(root) {
            out.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

#[async_trait]
impl ProcessStateStore for FsStateStore {
    async fn delete(&self, instance_id: InstanceId, name: &str) -> Result<(), ShikiError> {
        match std::fs::remove_dir_all(self.subtree(instance_id, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn import_dir(
        &self,
        instance_id: InstanceId,
        name: &str,
        src: &Path,
    ) -> Result<(), ShikiError> {
        let dst = self.subtree(instance_id, name);
        copy_tree(src, &dst)?;
        Ok(())
    }

    async fn list(&self, instance_id: InstanceId, name: &str) -> Result<Vec<String>, ShikiError> {
        let root = self.subtree(instance_id, name);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        list_tree(&root, &root, &mut out)?;
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    #[tokio::test]
    async fn import_then_delete_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        std::fs::write(staging.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(staging.path().join("nested")).unwrap();
        std::fs::write(staging.path().join("nested/b.txt"), b"b").unwrap();

        let store = FsStateStore::new(root.path());
        let id = InstanceId::from_ulid(Ulid::new());

        store.import_dir(id, "attachments", staging.path()).await.unwrap();
        let files = store.list(id, "attachments").await.unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "nested/b.txt".to_string()]);

        store.delete(id, "attachments").await.unwrap();
        assert!(store.list(id, "attachments").await.unwrap().is_empty());

        // Deleting again is not an error.
        store.delete(id, "attachments").await.unwrap();
    }
}
