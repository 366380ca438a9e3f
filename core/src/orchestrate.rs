use crate::config::Settings;
use crate::integrity::{Health, IntegrityChecker};
use crate::pair::PairResolver;
use crate::pipeline::{humanize, parse_estimated_size, PipelineBuilder, PipelineRunner};
use crate::remote::RemoteCatalog;
use crate::snapshot::{LocalCatalog, LocalSnapshot, SnapshotSource};
use crate::{Error, Result};
use tracing::{info, warn};

/// Outcome of one performed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub name: String,
    pub size: u64,
}

/// Decides which snapshots to upload and in what order, and drives the
/// pipeline builder for each transfer. Catalogs are populated by the caller
/// and not observed for mid-run mutation.
pub struct BackupOrchestrator<'a> {
    local: &'a LocalCatalog,
    remote: &'a RemoteCatalog,
    builder: PipelineBuilder<'a>,
    runner: &'a dyn PipelineRunner,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        filesystem: &'a str,
        s3_prefix: &str,
        local: &'a LocalCatalog,
        remote: &'a RemoteCatalog,
        runner: &'a dyn PipelineRunner,
    ) -> Self {
        Self {
            local,
            remote,
            builder: PipelineBuilder::new(settings, filesystem, s3_prefix),
            runner,
        }
    }

    fn resolve_target(&self, name: Option<&str>) -> Result<&'a LocalSnapshot> {
        match name {
            Some(name) => self.local.get(name).ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            }),
            None => self.local.latest(),
        }
    }

    async fn estimate(&self, snapshot_name: &str, parent: Option<&str>) -> Result<u64> {
        let stage = self.builder.estimate_stage(snapshot_name, parent);
        let output = self.runner.capture(&stage).await?;
        parse_estimated_size(&output)
    }

    /// Uploads one snapshot as a self-contained full backup. No parent
    /// metadata is attached.
    pub async fn backup_full(&self, name: Option<&str>) -> Result<Uploaded> {
        let target = self.resolve_target(name)?;
        let estimated = self.estimate(&target.name, None).await?;
        info!(
            snapshot = %target.name,
            estimate = %humanize(estimated),
            "full backup"
        );
        let plan = self.builder.backup_plan(&target.name, None, estimated)?;
        self.runner.run(&plan).await?;
        Ok(Uploaded {
            name: target.name.clone(),
            size: estimated,
        })
    }

    /// Uploads the target snapshot along with every ancestor needed to
    /// anchor it to a healthy remote snapshot, oldest first so the remote
    /// chain extends bottom-up. Progress already made is reported as-is if a
    /// later transfer fails; nothing is rolled back.
    pub async fn backup_incremental(&self, name: Option<&str>) -> Result<Vec<Uploaded>> {
        let target = self.resolve_target(name)?;
        let checker = IntegrityChecker::new(self.remote);
        let resolver = PairResolver::new(self.local, self.remote);

        // Walk up local parent links, newest to oldest, until a healthy
        // remote anchor is found.
        let mut pending: Vec<&LocalSnapshot> = Vec::new();
        let mut current = target;
        loop {
            if let Some(remote) = resolver.remote_for(&current.name) {
                if let Health::Broken(reason) = checker.health(remote) {
                    return Err(Error::Integrity(format!(
                        "broken snapshot detected: {}, reason: \"{reason}\"",
                        remote.name
                    )));
                }
                break;
            }
            pending.push(current);
            match current.parent.as_deref() {
                Some(parent) => {
                    current = self.local.get(parent).ok_or_else(|| {
                        Error::Integrity(format!("local parent chain broken at '{parent}'"))
                    })?;
                }
                None => {
                    return Err(Error::Integrity(
                        "could not find a healthy snapshot for incremental backup".to_string(),
                    ));
                }
            }
        }

        info!(count = pending.len(), "incremental backup");

        let mut uploaded = Vec::new();
        for snapshot in pending.iter().rev() {
            let parent = snapshot.parent.as_deref().ok_or_else(|| {
                Error::Integrity(format!("snapshot '{}' has no parent to send from", snapshot.name))
            })?;
            let estimated = self.estimate(&snapshot.name, Some(parent)).await?;
            info!(
                snapshot = %snapshot.name,
                parent = %parent,
                estimate = %humanize(estimated),
                "incremental backup"
            );
            let plan = self
                .builder
                .backup_plan(&snapshot.name, Some(parent), estimated)?;
            self.runner.run(&plan).await?;
            uploaded.push(Uploaded {
                name: snapshot.name.clone(),
                size: estimated,
            });
        }
        Ok(uploaded)
    }
}

/// Decides which remote snapshots must be applied, validates the whole chain
/// before moving any bytes, and applies the inverse pipeline oldest-first.
pub struct RestoreOrchestrator<'a> {
    source: &'a dyn SnapshotSource,
    local: &'a LocalCatalog,
    remote: &'a RemoteCatalog,
    builder: PipelineBuilder<'a>,
    runner: &'a dyn PipelineRunner,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(
        settings: &'a Settings,
        filesystem: &'a str,
        s3_prefix: &str,
        source: &'a dyn SnapshotSource,
        local: &'a LocalCatalog,
        remote: &'a RemoteCatalog,
        runner: &'a dyn PipelineRunner,
    ) -> Self {
        Self {
            source,
            local,
            remote,
            builder: PipelineBuilder::new(settings, filesystem, s3_prefix),
            runner,
        }
    }

    /// Restores `dataset@label` and whatever ancestors it needs, oldest
    /// first. Returns the names applied, in apply order. A failure mid-queue
    /// leaves the dataset partially restored; the operator must intervene
    /// locally.
    pub async fn restore(&self, dataset: &str, label: &str, force: bool) -> Result<Vec<String>> {
        if !force && self.source.dataset_exists(dataset).await? {
            warn!(
                dataset,
                "dataset already exists locally; pass --force to overwrite it"
            );
            return Ok(Vec::new());
        }

        let snap_name = format!("{dataset}@{label}");
        let start = self.remote.get(&snap_name).ok_or_else(|| Error::NotFound {
            name: snap_name.clone(),
        })?;

        // Discover newest-to-oldest, validating health at every step before
        // any transfer starts.
        let checker = IntegrityChecker::new(self.remote);
        let mut queue = Vec::new();
        let mut current = start;
        loop {
            if self.local.get(&current.name).is_some() {
                info!(
                    snapshot = %current.name,
                    "snapshot already exists locally; run 'zfs rollback {}' to roll back to it",
                    current.name
                );
                break;
            }
            if let Health::Broken(reason) = checker.health(current) {
                return Err(Error::Integrity(format!(
                    "broken snapshot detected: {}, reason: \"{reason}\"",
                    current.name
                )));
            }
            queue.push(current);
            if current.is_full() {
                break;
            }
            // a healthy non-full snapshot always has a resolvable parent
            current = current
                .parent_name()
                .and_then(|name| self.remote.get(name))
                .ok_or_else(|| {
                    Error::Integrity(format!("parent of '{}' disappeared from catalog", current.name))
                })?;
        }

        let mut applied = Vec::new();
        for snapshot in queue.iter().rev() {
            info!(
                snapshot = %snapshot.name,
                size = %humanize(snapshot.stored_size),
                "restoring"
            );
            let plan = self.builder.restore_plan(snapshot, dataset, force)?;
            self.runner.run(&plan).await?;
            applied.push(snapshot.name.clone());
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Stage, StoreAction, TransferPlan};
    use crate::remote::tests::meta;
    use crate::remote::RemoteSnapshot;
    use crate::snapshot::tests::{row, FakeSource};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingRunner {
        estimate_output: String,
        captures: Mutex<Vec<Stage>>,
        runs: Mutex<Vec<TransferPlan>>,
    }

    impl RecordingRunner {
        fn new(estimate_output: &str) -> Self {
            Self {
                estimate_output: estimate_output.to_string(),
                captures: Mutex::new(Vec::new()),
                runs: Mutex::new(Vec::new()),
            }
        }

        fn runs(&self) -> Vec<TransferPlan> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PipelineRunner for RecordingRunner {
        async fn capture(&self, stage: &Stage) -> Result<String> {
            self.captures.lock().unwrap().push(stage.clone());
            Ok(self.estimate_output.clone())
        }

        async fn run(&self, plan: &TransferPlan) -> Result<()> {
            self.runs.lock().unwrap().push(plan.clone());
            Ok(())
        }
    }

    fn settings() -> Settings {
        let overrides: HashMap<String, String> =
            [("compressor".to_string(), "none".to_string())].into();
        Settings::from_layers(overrides, HashMap::new(), None).unwrap()
    }

    async fn local_chain(names: &[&str]) -> (FakeSource, LocalCatalog) {
        let source = FakeSource {
            rows: names.iter().map(|n| row(n)).collect(),
            datasets: vec![],
        };
        let catalog = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        (source, catalog)
    }

    fn remote_full(name: &str, size: u64) -> RemoteSnapshot {
        RemoteSnapshot::new(name.to_string(), size, meta(&[("isfull", "true")]))
    }

    fn remote_incr(name: &str, parent: &str) -> RemoteSnapshot {
        RemoteSnapshot::new(name.to_string(), 0, meta(&[("parent", parent)]))
    }

    fn put_key(plan: &TransferPlan) -> &str {
        match &plan.store {
            StoreAction::Put { key, .. } => key,
            _ => panic!("expected a put"),
        }
    }

    fn put_meta<'p>(plan: &'p TransferPlan, key: &str) -> Option<&'p str> {
        match &plan.store {
            StoreAction::Put { metadata, .. } => metadata.get(key).map(String::as_str),
            _ => panic!("expected a put"),
        }
    }

    fn get_key(plan: &TransferPlan) -> &str {
        match &plan.store {
            StoreAction::Get { key, .. } => key,
            _ => panic!("expected a get"),
        }
    }

    #[tokio::test]
    async fn full_backup_uploads_latest_without_parent() {
        let (_source, local) = local_chain(&["tank/data@auto-1", "tank/data@auto-2"]).await;
        let remote = RemoteCatalog::from_records(vec![]);
        let runner = RecordingRunner::new("size\t10300\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let uploaded = orch.backup_full(None).await.unwrap();
        assert_eq!(uploaded.name, "tank/data@auto-2");
        assert_eq!(uploaded.size, 10300);

        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(put_key(&runs[0]), "snapferry/tank/data@auto-2");
        assert_eq!(put_meta(&runs[0], "isfull"), Some("true"));
        assert_eq!(put_meta(&runs[0], "parent"), None);

        // the estimate came from the dry verbose emit
        let captures = runner.captures.lock().unwrap();
        assert_eq!(captures[0].args, ["send", "-R", "-nvP", "tank/data@auto-2"]);
    }

    #[tokio::test]
    async fn full_backup_of_unknown_name_is_not_found() {
        let (_source, local) = local_chain(&["tank/data@auto-1"]).await;
        let remote = RemoteCatalog::from_records(vec![]);
        let runner = RecordingRunner::new("size\t1\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let err = orch.backup_full(Some("tank/data@auto-9")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn incremental_extends_the_chain_oldest_first() {
        let (_source, local) =
            local_chain(&["tank/data@auto-1", "tank/data@auto-2", "tank/data@auto-3"]).await;
        let remote = RemoteCatalog::from_records(vec![remote_full("tank/data@auto-1", 5)]);
        let runner = RecordingRunner::new("size\t2048\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let uploaded = orch.backup_incremental(None).await.unwrap();
        let names: Vec<_> = uploaded.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["tank/data@auto-2", "tank/data@auto-3"]);

        let runs = runner.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(put_key(&runs[0]), "snapferry/tank/data@auto-2");
        assert_eq!(put_meta(&runs[0], "parent"), Some("tank/data@auto-1"));
        assert_eq!(put_key(&runs[1]), "snapferry/tank/data@auto-3");
        assert_eq!(put_meta(&runs[1], "parent"), Some("tank/data@auto-2"));
    }

    #[tokio::test]
    async fn incremental_with_current_remote_is_a_no_op() {
        let (_source, local) = local_chain(&["tank/data@auto-1", "tank/data@auto-2"]).await;
        let remote = RemoteCatalog::from_records(vec![remote_full("tank/data@auto-2", 5)]);
        let runner = RecordingRunner::new("size\t1\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let uploaded = orch.backup_incremental(None).await.unwrap();
        assert!(uploaded.is_empty());
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn incremental_aborts_on_unhealthy_remote_match() {
        let (_source, local) = local_chain(&["tank/data@auto-1", "tank/data@auto-2"]).await;
        // auto-1 exists remotely but points at a ghost parent
        let remote =
            RemoteCatalog::from_records(vec![remote_incr("tank/data@auto-1", "tank/data@ghost")]);
        let runner = RecordingRunner::new("size\t1\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let err = orch.backup_incremental(None).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(err.to_string().contains("missing parent"));
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn incremental_fails_when_chain_is_exhausted() {
        let (_source, local) = local_chain(&["tank/data@auto-1", "tank/data@auto-2"]).await;
        let remote = RemoteCatalog::from_records(vec![]);
        let runner = RecordingRunner::new("size\t1\n");
        let settings = settings();
        let orch =
            BackupOrchestrator::new(&settings, "tank/data", "snapferry", &local, &remote, &runner);

        let err = orch.backup_incremental(None).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn restore_without_force_on_existing_dataset_moves_nothing() {
        let source = FakeSource {
            rows: vec![],
            datasets: vec!["tank/data".to_string()],
        };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        let remote = RemoteCatalog::from_records(vec![remote_full("tank/data@auto-1", 5)]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let applied = orch.restore("tank/data", "auto-1", false).await.unwrap();
        assert!(applied.is_empty());
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn restore_of_missing_snapshot_is_not_found() {
        let source = FakeSource { rows: vec![], datasets: vec![] };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        let remote = RemoteCatalog::from_records(vec![]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let err = orch.restore("tank/data", "auto-9", false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn restore_applies_the_chain_oldest_first() {
        let source = FakeSource { rows: vec![], datasets: vec![] };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        let remote = RemoteCatalog::from_records(vec![
            remote_full("tank/data@auto-1", 10),
            remote_incr("tank/data@auto-2", "tank/data@auto-1"),
            remote_incr("tank/data@auto-3", "tank/data@auto-2"),
        ]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let applied = orch.restore("tank/data", "auto-3", false).await.unwrap();
        assert_eq!(
            applied,
            ["tank/data@auto-1", "tank/data@auto-2", "tank/data@auto-3"]
        );

        let runs = runner.runs();
        let keys: Vec<_> = runs.iter().map(get_key).collect();
        assert_eq!(
            keys,
            [
                "snapferry/tank/data@auto-1",
                "snapferry/tank/data@auto-2",
                "snapferry/tank/data@auto-3"
            ]
        );
        // every plan ends in a receive stage without -F
        for plan in &runs {
            let last = plan.stages.last().unwrap();
            assert_eq!(last.program, "zfs");
            assert_eq!(last.args, ["recv", "tank/data"]);
        }
    }

    #[tokio::test]
    async fn restore_validates_the_whole_chain_before_any_transfer() {
        let source = FakeSource { rows: vec![], datasets: vec![] };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        // auto-2 is broken, auto-3 references it
        let remote = RemoteCatalog::from_records(vec![
            remote_incr("tank/data@auto-2", "tank/data@ghost"),
            remote_incr("tank/data@auto-3", "tank/data@auto-2"),
        ]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let err = orch.restore("tank/data", "auto-3", false).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(runner.runs().is_empty());
    }

    #[tokio::test]
    async fn restore_with_force_passes_rollback_flag() {
        let source = FakeSource {
            rows: vec![],
            datasets: vec!["tank/data".to_string()],
        };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        let remote = RemoteCatalog::from_records(vec![remote_full("tank/data@auto-1", 10)]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let applied = orch.restore("tank/data", "auto-1", true).await.unwrap();
        assert_eq!(applied, ["tank/data@auto-1"]);
        let runs = runner.runs();
        let last = runs[0].stages.last().unwrap();
        assert_eq!(last.args, ["recv", "-F", "tank/data"]);
    }

    #[tokio::test]
    async fn restore_stops_at_a_snapshot_that_exists_locally() {
        let source = FakeSource {
            rows: vec![row("tank/data@auto-1")],
            datasets: vec![],
        };
        let local = LocalCatalog::load(&source, "tank/data", "auto").await.unwrap();
        let remote = RemoteCatalog::from_records(vec![
            remote_full("tank/data@auto-1", 10),
            remote_incr("tank/data@auto-2", "tank/data@auto-1"),
        ]);
        let runner = RecordingRunner::new("");
        let settings = settings();
        let orch = RestoreOrchestrator::new(
            &settings, "tank/data", "snapferry", &source, &local, &remote, &runner,
        );

        let applied = orch.restore("tank/data", "auto-2", false).await.unwrap();
        assert_eq!(applied, ["tank/data@auto-2"]);
    }
}
