use super::Context;
use clap::Args;
use snapferry_backends::ShellRunner;
use snapferry_core::{humanize, BackupOrchestrator, Result};
use std::collections::HashMap;
use tracing::info;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, help = "Snapshot label to back up. Defaults to the latest.")]
    snapshot: Option<String>,

    #[arg(long, conflicts_with = "incremental", help = "Perform a full backup")]
    full: bool,

    #[arg(long, help = "Perform an incremental backup; this is the default")]
    incremental: bool,

    #[arg(long, help = "Compressor to use; \"none\" disables compression")]
    compressor: Option<String>,

    #[arg(long, help = "Encryptor to use; \"none\" disables encryption")]
    encryptor: Option<String>,

    #[arg(long, short = 'n', help = "Log the composed pipelines without transferring")]
    dry_run: bool,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let mut extra = HashMap::new();
        if let Some(compressor) = &self.compressor {
            extra.insert("compressor".to_string(), compressor.clone());
        }
        if let Some(encryptor) = &self.encryptor {
            extra.insert("encryptor".to_string(), encryptor.clone());
        }

        let ctx = Context::build(cli, extra).await?;
        let runner = ShellRunner::new(&ctx.store, self.dry_run);
        let orchestrator = BackupOrchestrator::new(
            &ctx.settings,
            &ctx.filesystem,
            &ctx.s3_prefix,
            &ctx.local,
            &ctx.remote,
            &runner,
        );

        let target = self
            .snapshot
            .as_ref()
            .map(|label| format!("{}@{}", ctx.filesystem, label));

        if self.dry_run {
            info!("dry run, nothing will be transferred");
        }

        let full = if self.incremental { false } else { self.full };
        let uploaded = if full {
            vec![orchestrator.backup_full(target.as_deref()).await?]
        } else {
            orchestrator.backup_incremental(target.as_deref()).await?
        };

        for upload in &uploaded {
            println!("Successfully backed up {}: {}", upload.name, humanize(upload.size));
        }
        if uploaded.is_empty() {
            println!("Nothing to do; the latest snapshot is already backed up.");
        }
        Ok(())
    }
}
