//! Artifact and test-result ingestion.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use convoy_core::artifact::{Artifact, ObjectStore, content_checksum};
use convoy_core::job::Variable;
use convoy_core::report::TestReport;
use convoy_core::{ArtifactId, Error, NodeRunId, Result};

/// Storage of worker-reported build outputs against the owning node-run.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Record artifact metadata. The bytes are already in the object store
    /// by the time this is called.
    async fn store_artifact(&self, artifact: Artifact) -> Result<Artifact>;

    async fn artifacts(&self, node_run_id: NodeRunId) -> Result<Vec<Artifact>>;

    async fn artifact(&self, id: ArtifactId) -> Result<Artifact>;

    /// Store the node-run's test report, replacing any prior one wholesale.
    /// Aggregates are recomputed from the suites before storage.
    async fn store_test_report(&self, node_run_id: NodeRunId, report: TestReport)
    -> Result<TestReport>;

    async fn test_report(&self, node_run_id: NodeRunId) -> Result<Option<TestReport>>;

    /// Set a shared variable for the run; overwrites by name.
    async fn set_variable(&self, node_run_id: NodeRunId, variable: Variable) -> Result<()>;

    async fn variables(&self, node_run_id: NodeRunId) -> Result<Vec<Variable>>;
}

/// Validate a one-shot artifact upload and store it.
///
/// Declared size and checksum must match the received bytes before anything
/// is written; the blob then goes to the object store and the metadata to
/// the backing store. The object path is derived from ids, never from the
/// caller-supplied name.
pub async fn ingest_artifact(
    store: &dyn IngestStore,
    objects: &dyn ObjectStore,
    node_run_id: NodeRunId,
    name: &str,
    tag: &str,
    declared_size: i64,
    declared_md5: &str,
    perm: u32,
    data: Bytes,
) -> Result<Artifact> {
    if data.len() as i64 != declared_size {
        return Err(Error::ArtifactUploadFailed(format!(
            "declared size {declared_size} but received {} bytes",
            data.len()
        )));
    }
    let checksum = content_checksum(&data);
    if checksum != declared_md5 {
        return Err(Error::ArtifactUploadFailed(format!(
            "declared md5 {declared_md5} but content hashes to {checksum}"
        )));
    }

    let id = ArtifactId::new();
    let object_path = format!("{node_run_id}/{id}");
    objects.put(&object_path, data).await?;

    store
        .store_artifact(Artifact {
            id,
            node_run_id,
            name: name.to_string(),
            tag: tag.to_string(),
            size: declared_size,
            perm,
            md5: checksum,
            object_path,
            created_at: Utc::now(),
        })
        .await
}
