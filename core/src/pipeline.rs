use crate::config::Settings;
use crate::remote::RemoteSnapshot;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One process stage of a transfer pipeline: program, arguments, extra
/// environment. Stages are plain descriptors; composing them never touches a
/// shell, and nothing executes until the full plan is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Stage {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
        }
    }

    /// Rendering for logs and dry-run preview only; execution always goes
    /// through the structured fields.
    pub fn render(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// The store endpoint of a plan: an upload at the tail of a backup chain, or
/// a download at the head of a restore chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    Put {
        key: String,
        metadata: BTreeMap<String, String>,
        estimated: u64,
    },
    Get {
        key: String,
        expected: u64,
    },
}

/// A fully assembled transfer for one snapshot. For `Put` the process stages
/// run first and feed the upload; for `Get` the download feeds the first
/// stage. Assemble-then-run, atomic per transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub stages: Vec<Stage>,
    pub store: StoreAction,
}

impl TransferPlan {
    pub fn render(&self) -> String {
        let stages: Vec<String> = self.stages.iter().map(Stage::render).collect();
        match &self.store {
            StoreAction::Put { key, .. } => format!("{} | put {}", stages.join(" | "), key),
            StoreAction::Get { key, .. } => format!("get {} | {}", key, stages.join(" | ")),
        }
    }
}

/// Executes assembled plans. The real implementation spawns the OS pipe
/// chain and moves bytes to/from the store; a preview implementation logs
/// the composed chain instead. The orchestrators never spawn processes
/// themselves.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Runs one stage capturing its combined output. Used for the dry
    /// estimate emission, which is read-only and runs even in preview mode.
    async fn capture(&self, stage: &Stage) -> Result<String>;

    async fn run(&self, plan: &TransferPlan) -> Result<()>;
}

struct Codec {
    forward: &'static [&'static str],
    inverse: &'static [&'static str],
}

fn compressor(name: &str) -> Option<Codec> {
    let codec = match name {
        "pigz1" => Codec {
            forward: &["pigz", "-1", "--blocksize", "4096"],
            inverse: &["pigz", "-d"],
        },
        "pigz4" => Codec {
            forward: &["pigz", "-4", "--blocksize", "4096"],
            inverse: &["pigz", "-d"],
        },
        "pbzip2" => Codec {
            forward: &["pbzip2", "-c"],
            inverse: &["pbzip2", "-c", "-d"],
        },
        "zstd3" => Codec {
            forward: &["zstd", "-3", "-T0"],
            inverse: &["zstd", "-T0", "-d"],
        },
        _ => return None,
    };
    Some(codec)
}

fn stage_from(argv: &[&str]) -> Stage {
    Stage::new(argv[0], &argv[1..])
}

/// Composes the ordered stage sequence for one transfer.
///
/// Backup selects compressor/encryptor from current configuration; restore
/// selects them strictly from the target snapshot's recorded metadata, so a
/// later configuration change can never corrupt an old restore.
pub struct PipelineBuilder<'a> {
    settings: &'a Settings,
    filesystem: &'a str,
    s3_prefix: String,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(settings: &'a Settings, filesystem: &'a str, s3_prefix: &str) -> Self {
        Self {
            settings,
            filesystem,
            s3_prefix: s3_prefix.trim_matches('/').to_string(),
        }
    }

    fn key_for(&self, snapshot_name: &str) -> String {
        format!("{}/{}", self.s3_prefix, snapshot_name)
    }

    /// `zfs send -R -nvP [-i parent] name` — the dry, verbose variant of the
    /// emit stage, whose output carries the size estimate.
    pub fn estimate_stage(&self, snapshot_name: &str, parent: Option<&str>) -> Stage {
        match parent {
            Some(parent) => {
                Stage::new("zfs", &["send", "-R", "-nvP", "-i", parent, snapshot_name])
            }
            None => Stage::new("zfs", &["send", "-R", "-nvP", snapshot_name]),
        }
    }

    fn emit_stage(&self, snapshot_name: &str, parent: Option<&str>) -> Stage {
        match parent {
            Some(parent) => Stage::new("zfs", &["send", "-R", "-i", parent, snapshot_name]),
            None => Stage::new("zfs", &["send", "-R", snapshot_name]),
        }
    }

    fn receive_stage(&self, dataset: &str, force: bool) -> Stage {
        if force {
            Stage::new("zfs", &["recv", "-F", dataset])
        } else {
            Stage::new("zfs", &["recv", dataset])
        }
    }

    fn compress_stage(&self, name: &str) -> Result<Stage> {
        let codec = compressor(name)
            .ok_or_else(|| Error::Configuration(format!("unknown compressor '{name}'")))?;
        Ok(stage_from(codec.forward))
    }

    fn decompress_stage(&self, name: &str) -> Result<Stage> {
        let codec = compressor(name)
            .ok_or_else(|| Error::Configuration(format!("unknown compressor '{name}'")))?;
        Ok(stage_from(codec.inverse))
    }

    fn encrypt_stage(&self, name: &str) -> Result<Stage> {
        match name {
            "gpg" => {
                let keyid = self
                    .settings
                    .require("gpg_keyid", Some(self.filesystem))?
                    .to_string();
                Ok(Stage::new("gpg", &["-r", &keyid, "-e"]))
            }
            _ => Err(Error::Configuration(format!("unknown encryptor '{name}'"))),
        }
    }

    fn decrypt_stage(&self, name: &str) -> Result<Stage> {
        match name {
            "gpg" => Ok(Stage::new("gpg", &["-d"])),
            _ => Err(Error::Configuration(format!("unknown encryptor '{name}'"))),
        }
    }

    /// emit → compress? → encrypt? → store, with the metadata that later
    /// restores and integrity checks depend on.
    pub fn backup_plan(
        &self,
        snapshot_name: &str,
        parent: Option<&str>,
        estimated: u64,
    ) -> Result<TransferPlan> {
        let mut stages = vec![self.emit_stage(snapshot_name, parent)];
        let mut metadata = BTreeMap::new();
        metadata.insert("size".to_string(), estimated.to_string());
        match parent {
            Some(parent) => metadata.insert("parent".to_string(), parent.to_string()),
            None => metadata.insert("isfull".to_string(), "true".to_string()),
        };

        if let Some(name) = self.settings.get_enabled("compressor", Some(self.filesystem)) {
            stages.push(self.compress_stage(name)?);
            metadata.insert("compressor".to_string(), name.to_string());
        }
        if let Some(name) = self.settings.get_enabled("encryptor", Some(self.filesystem)) {
            stages.push(self.encrypt_stage(name)?);
            metadata.insert("encryptor".to_string(), name.to_string());
        }

        Ok(TransferPlan {
            stages,
            store: StoreAction::Put {
                key: self.key_for(snapshot_name),
                metadata,
                estimated,
            },
        })
    }

    /// fetch → decrypt? → decompress? → receive. Stage selection comes from
    /// the snapshot's own recorded provenance, never from configuration.
    pub fn restore_plan(
        &self,
        snapshot: &RemoteSnapshot,
        dataset: &str,
        force: bool,
    ) -> Result<TransferPlan> {
        let mut stages = Vec::new();
        if let Some(name) = snapshot.encryptor() {
            stages.push(self.decrypt_stage(name)?);
        }
        if let Some(name) = snapshot.compressor() {
            stages.push(self.decompress_stage(name)?);
        }
        stages.push(self.receive_stage(dataset, force));

        Ok(TransferPlan {
            stages,
            store: StoreAction::Get {
                key: self.key_for(&snapshot.name),
                expected: snapshot.stored_size,
            },
        })
    }
}

/// Extracts the byte estimate from the output of the dry emit: the last
/// whitespace-delimited token of the last non-empty line. Inherited format
/// dependency on the snapshot tooling; on failure the raw output is
/// preserved verbatim for diagnosis.
pub fn parse_estimated_size(output: &str) -> Result<u64> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().last())
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| Error::EstimateParse {
            output: output.to_string(),
        })
}

/// Human-readable byte counts for logs and status output.
pub fn humanize(size: u64) -> String {
    let units = ["M", "G", "T"];
    let mut size = size as f64 / (1024.0 * 1024.0);
    let mut unit = 0;
    while size > 1024.0 && unit < units.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let text = format!("{size:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, units[unit])
}
