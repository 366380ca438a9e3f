use crate::s3::S3Store;
use async_trait::async_trait;
use snapferry_core::{Error, PipelineRunner, Result, Stage, StoreAction, TransferPlan};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// Executes assembled transfer plans as one sequential OS pipe chain per
/// plan, streaming the chain's end into the object store (backup) or the
/// store's stream into the chain's head (restore). Every run is a blocking
/// call from the orchestrator's perspective.
///
/// In preview mode the composed chain is logged and nothing mutating runs;
/// size estimation still executes, since the dry emit is read-only.
pub struct ShellRunner<'a> {
    store: &'a S3Store,
    preview: bool,
}

impl<'a> ShellRunner<'a> {
    pub fn new(store: &'a S3Store, preview: bool) -> Self {
        Self { store, preview }
    }

    async fn run_backup(&self, plan: &TransferPlan) -> Result<()> {
        let StoreAction::Put { key, metadata, .. } = &plan.store else {
            return Err(Error::Command("backup plan without a put endpoint".to_string()));
        };

        let mut children: Vec<(String, Child)> = Vec::new();
        let mut prev: Option<ChildStdout> = None;
        for stage in &plan.stages {
            let mut cmd = command_for(stage);
            match prev.take() {
                Some(out) => {
                    let stdio: Stdio = out.try_into()?;
                    cmd.stdin(stdio);
                }
                None => {
                    cmd.stdin(Stdio::null());
                }
            }
            cmd.stdout(Stdio::piped());
            let mut child = spawn(&mut cmd, stage)?;
            prev = child.stdout.take();
            children.push((stage.program.clone(), child));
        }
        let mut tail = prev
            .ok_or_else(|| Error::Command("backup plan with no stages".to_string()))?;

        // Spool the finished stream to disk, then hand it to the store as
        // one object with its metadata.
        let spool = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::File::create(spool.path()).await?;
        tokio::io::copy(&mut tail, &mut file).await?;
        file.flush().await?;
        drop(file);

        wait_all(children).await?;
        self.store.put(key, spool.path(), metadata).await
    }

    async fn run_restore(&self, plan: &TransferPlan) -> Result<()> {
        let StoreAction::Get { key, .. } = &plan.store else {
            return Err(Error::Command("restore plan without a get endpoint".to_string()));
        };

        let mut children: Vec<(String, Child)> = Vec::new();
        let mut prev: Option<ChildStdout> = None;
        let last = plan.stages.len().saturating_sub(1);
        for (i, stage) in plan.stages.iter().enumerate() {
            let mut cmd = command_for(stage);
            match prev.take() {
                Some(out) => {
                    let stdio: Stdio = out.try_into()?;
                    cmd.stdin(stdio);
                }
                None => {
                    cmd.stdin(Stdio::piped());
                }
            }
            cmd.stdout(if i == last { Stdio::inherit() } else { Stdio::piped() });
            let mut child = spawn(&mut cmd, stage)?;
            if i != last {
                prev = child.stdout.take();
            }
            children.push((stage.program.clone(), child));
        }

        let Some((_, head)) = children.first_mut() else {
            return Err(Error::Command("restore plan with no stages".to_string()));
        };
        let mut head_stdin = head
            .stdin
            .take()
            .ok_or_else(|| Error::Command("restore head stage lost its stdin".to_string()))?;

        let body = self.store.get(key).await?;
        let mut reader = body.into_async_read();
        tokio::io::copy(&mut reader, &mut head_stdin).await?;
        head_stdin.shutdown().await?;
        drop(head_stdin);

        wait_all(children).await
    }
}

fn command_for(stage: &Stage) -> Command {
    let mut cmd = Command::new(&stage.program);
    cmd.args(&stage.args);
    cmd.envs(stage.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    cmd
}

fn spawn(cmd: &mut Command, stage: &Stage) -> Result<Child> {
    debug!(stage = %stage.render(), "spawning");
    cmd.spawn()
        .map_err(|e| Error::Command(format!("failed to spawn {}: {e}", stage.program)))
}

async fn wait_all(children: Vec<(String, Child)>) -> Result<()> {
    for (program, mut child) in children {
        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::Command(format!("{program} exited with {status}")));
        }
    }
    Ok(())
}

#[async_trait]
impl PipelineRunner for ShellRunner<'_> {
    async fn capture(&self, stage: &Stage) -> Result<String> {
        let output = command_for(stage).output().await?;
        // stderr is appended so diagnostics survive into parse errors
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(Error::Command(format!(
                "{} exited with {}: {}",
                stage.program,
                output.status,
                text.trim()
            )));
        }
        Ok(text)
    }

    async fn run(&self, plan: &TransferPlan) -> Result<()> {
        if self.preview {
            info!(chain = %plan.render(), "dry-run");
            return Ok(());
        }
        info!(chain = %plan.render(), "running transfer");
        match &plan.store {
            StoreAction::Put { .. } => self.run_backup(plan).await,
            StoreAction::Get { .. } => self.run_restore(plan).await,
        }
    }
}
