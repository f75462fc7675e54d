//! Filesystem object store for artifact bytes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use convoy_core::artifact::ObjectStore;
use convoy_core::{Error, Result};

/// Stores artifact blobs as plain files under a base directory. Object
/// paths are generated from ids by the ingestion layer, so they are safe to
/// join onto the base directory as-is.
pub struct FsObjectStore {
    basedir: PathBuf,
}

impl FsObjectStore {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.basedir.join(path)
    }
}

fn io_err(context: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{context} {}: {err}", path.display()))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create", parent, e))?;
        }
        tokio::fs::write(&full, &data)
            .await
            .map_err(|e| io_err("write", &full, e))
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.full_path(path);
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {path}")))
            }
            Err(e) => Err(io_err("read", &full, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove", &full, e)),
        }
    }
}
