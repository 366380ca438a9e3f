use async_trait::async_trait;
use snapferry_core::{Error, Result, SnapshotRow, SnapshotSource};
use tokio::process::Command;
use tracing::debug;

/// Local snapshot source backed by the `zfs` command-line tool.
pub struct ZfsCli;

impl ZfsCli {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_listing(text: &str) -> Vec<SnapshotRow> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            Some(SnapshotRow {
                name: fields.next()?.to_string(),
                used: fields.next()?.to_string(),
                refer: fields.next()?.to_string(),
                mountpoint: fields.next()?.to_string(),
                written: fields.next()?.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl SnapshotSource for ZfsCli {
    async fn list(&self, filesystem: &str) -> Result<Vec<SnapshotRow>> {
        let output = Command::new("zfs")
            .args(["list", "-Ht", "snap", "-o", "name,used,refer,mountpoint,written"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Command(format!(
                "zfs list failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let prefix = format!("{filesystem}@");
        let rows: Vec<SnapshotRow> = parse_listing(&text)
            .into_iter()
            .filter(|row| row.name.starts_with(&prefix))
            .collect();
        debug!(filesystem, count = rows.len(), "listed local snapshots");
        Ok(rows)
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let status = Command::new("zfs")
            .args(["list", dataset])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }
}
