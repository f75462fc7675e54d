//! Artifact metadata and the object-store trait.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::id::{ArtifactId, NodeRunId};

/// Metadata for one stored artifact. The bytes live in an object store;
/// this record only carries the association and the integrity fields.
/// Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub node_run_id: NodeRunId,
    pub name: String,
    pub tag: String,
    pub size: i64,
    /// Unix permission bits the worker declared for the file.
    pub perm: u32,
    pub md5: String,
    /// Where the bytes live, object-store specific.
    pub object_path: String,
    pub created_at: DateTime<Utc>,
}

/// Hex md5 of artifact content, the checksum workers declare on upload.
pub fn content_checksum(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Storage backend for artifact bytes. Metadata validation happens before
/// anything reaches a store; implementations only move bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Bytes>;

    async fn delete(&self, path: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_hex_md5() {
        assert_eq!(content_checksum(b"Hi, I am foo"), content_checksum(b"Hi, I am foo"));
        assert_ne!(content_checksum(b"Hi, I am foo"), content_checksum(b"Hi, I am bar"));
        assert_eq!(content_checksum(b"").len(), 32);
    }
}
