use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// One row of the local snapshot listing, as reported by
/// `zfs list -Ht snap -o name,used,refer,mountpoint,written`.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub name: String,
    pub used: String,
    pub refer: String,
    pub mountpoint: String,
    pub written: String,
}

/// Narrow interface over the local snapshot tooling. The real implementation
/// shells out to the `zfs` CLI; tests substitute a fake.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// All snapshots of the filesystem, in creation order.
    async fn list(&self, filesystem: &str) -> Result<Vec<SnapshotRow>>;

    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;
}

/// Immutable record of one local snapshot.
///
/// `parent` is a name back-reference resolved through the owning catalog,
/// never an owned pointer. Local parentage is positional: the immediately
/// preceding surviving snapshot after prefix filtering. Local chronology is
/// authoritative for newly created snapshots, so persisted metadata is never
/// consulted here.
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    pub name: String,
    pub parent: Option<String>,
    pub used: String,
    pub refer: String,
    pub mountpoint: String,
    pub written: String,
}

/// Local snapshots of one filesystem, filtered by snapshot prefix, populated
/// once and memoized for the run.
pub struct LocalCatalog {
    filesystem: String,
    snapshot_prefix: String,
    snapshots: Vec<LocalSnapshot>,
    index: HashMap<String, usize>,
}

impl LocalCatalog {
    pub async fn load(
        source: &dyn SnapshotSource,
        filesystem: &str,
        snapshot_prefix: &str,
    ) -> Result<Self> {
        let rows = source.list(filesystem).await?;
        let mut snapshots = Vec::new();
        let mut index = HashMap::new();
        let mut parent: Option<String> = None;

        for row in rows {
            let label = match row.name.split_once('@') {
                Some((fs, label)) if fs == filesystem => label,
                _ => continue,
            };
            if !label.starts_with(snapshot_prefix) {
                continue;
            }
            let snapshot = LocalSnapshot {
                name: row.name.clone(),
                parent: parent.take(),
                used: row.used,
                refer: row.refer,
                mountpoint: row.mountpoint,
                written: row.written,
            };
            parent = Some(snapshot.name.clone());
            index.insert(snapshot.name.clone(), snapshots.len());
            snapshots.push(snapshot);
        }

        debug!(
            filesystem,
            snapshot_prefix,
            count = snapshots.len(),
            "local catalog populated"
        );

        Ok(Self {
            filesystem: filesystem.to_string(),
            snapshot_prefix: snapshot_prefix.to_string(),
            snapshots,
            index,
        })
    }

    /// Snapshots in creation order.
    pub fn list(&self) -> &[LocalSnapshot] {
        &self.snapshots
    }

    pub fn get(&self, name: &str) -> Option<&LocalSnapshot> {
        self.index.get(name).map(|&i| &self.snapshots[i])
    }

    /// The most recent snapshot. An empty filtered catalog usually means the
    /// snapshot prefix is misconfigured, which is a reportable condition
    /// rather than a crash.
    pub fn latest(&self) -> Result<&LocalSnapshot> {
        self.snapshots.last().ok_or_else(|| {
            Error::Soft(format!(
                "Nothing to backup for filesystem '{}'. Are you sure snapshot_prefix='{}' is correct?",
                self.filesystem, self.snapshot_prefix
            ))
        })
    }
}
