use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// One object listed from the store: key, persisted metadata, stored length.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub metadata: HashMap<String, String>,
    pub length: u64,
}

/// Narrow interface over the object store, as seen by the catalog. Moving
/// bytes is the pipeline runner's business, not the model's.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<RemoteObject>>;
}

/// Immutable record of one remote snapshot object.
///
/// Everything except the name and stored size comes from persisted object
/// metadata, which is untrusted: the parent link may point at an absent name
/// or form a cycle. Parents are therefore plain name references resolved
/// through the catalog.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub name: String,
    /// Size of the stored object (post compression/encryption).
    pub stored_size: u64,
    metadata: HashMap<String, String>,
}

impl RemoteSnapshot {
    pub fn new(name: String, stored_size: u64, metadata: HashMap<String, String>) -> Self {
        // metadata keys are matched case-insensitively
        let metadata = metadata
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self { name, stored_size, metadata }
    }

    /// Both `isfull` and `is_full` are accepted for compatibility with
    /// objects written by older releases.
    pub fn is_full(&self) -> bool {
        ["isfull", "is_full"]
            .iter()
            .any(|k| self.metadata.get(*k).map(String::as_str) == Some("true"))
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.metadata.get("parent").map(String::as_str)
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.eq_ignore_ascii_case("none"))
    }

    /// Compressor recorded at backup time; `None` when disabled.
    pub fn compressor(&self) -> Option<&str> {
        self.tag("compressor")
    }

    /// Encryptor recorded at backup time; `None` when disabled.
    pub fn encryptor(&self) -> Option<&str> {
        self.tag("encryptor")
    }

    /// Uncompressed size estimate declared at backup time.
    pub fn declared_size(&self) -> Option<u64> {
        self.metadata.get("size").and_then(|s| s.parse().ok())
    }
}

/// Remote snapshots under `{s3_prefix}/{filesystem}@{snapshot_prefix}`,
/// populated once and memoized for the run.
pub struct RemoteCatalog {
    snapshots: Vec<RemoteSnapshot>,
    index: HashMap<String, usize>,
}

impl RemoteCatalog {
    pub async fn load(
        store: &dyn ObjectStore,
        s3_prefix: &str,
        filesystem: &str,
        snapshot_prefix: &str,
    ) -> Result<Self> {
        let s3_prefix = s3_prefix.trim_matches('/');
        let prefix = format!("{s3_prefix}/{filesystem}@{snapshot_prefix}");
        let objects = store.list_by_prefix(&prefix).await?;

        let mut snapshots: Vec<RemoteSnapshot> = objects
            .into_iter()
            .filter_map(|obj| {
                let name = obj.key.strip_prefix(&format!("{s3_prefix}/"))?.to_string();
                Some(RemoteSnapshot::new(name, obj.length, obj.metadata))
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));

        let index = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        debug!(prefix, count = snapshots.len(), "remote catalog populated");

        Ok(Self { snapshots, index })
    }

    /// Builds a catalog directly from records, bypassing the store. Used by
    /// tests that need malformed chains.
    pub fn from_records(mut snapshots: Vec<RemoteSnapshot>) -> Self {
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        let index = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self { snapshots, index }
    }

    /// Records sorted by name.
    pub fn list(&self) -> &[RemoteSnapshot] {
        &self.snapshots
    }

    pub fn get(&self, name: &str) -> Option<&RemoteSnapshot> {
        self.index.get(name).map(|&i| &self.snapshots[i])
    }
}
