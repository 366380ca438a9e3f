use super::Context;
use clap::Args;
use snapferry_backends::ShellRunner;
use snapferry_core::{RestoreOrchestrator, Result};
use std::collections::HashMap;
use tracing::info;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Snapshot label to restore")]
    snapshot: String,

    #[arg(long, help = "Force rollback of the filesystem (zfs recv -F)")]
    force: bool,

    #[arg(long, short = 'n', help = "Log the composed pipelines without transferring")]
    dry_run: bool,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let ctx = Context::build(cli, HashMap::new()).await?;
        let runner = ShellRunner::new(&ctx.store, self.dry_run);
        let orchestrator = RestoreOrchestrator::new(
            &ctx.settings,
            &ctx.filesystem,
            &ctx.s3_prefix,
            &ctx.zfs,
            &ctx.local,
            &ctx.remote,
            &runner,
        );

        if self.dry_run {
            info!("dry run, nothing will be transferred");
        }

        let applied = orchestrator
            .restore(&ctx.filesystem, &self.snapshot, self.force)
            .await?;

        if applied.is_empty() {
            println!("Nothing restored.");
        } else {
            for name in &applied {
                println!("Restored {name}");
            }
        }
        Ok(())
    }
}
