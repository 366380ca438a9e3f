pub mod backup;
pub mod restore;
pub mod status;

use snapferry_backends::{S3Store, ZfsCli};
use snapferry_core::{LocalCatalog, RemoteCatalog, Result, Settings};
use std::collections::HashMap;

/// Everything a command needs for one run: resolved settings, the store and
/// snapshot source, and both catalogs populated once up front.
pub struct Context {
    pub settings: Settings,
    pub filesystem: String,
    pub s3_prefix: String,
    pub snapshot_prefix: String,
    pub store: S3Store,
    pub zfs: ZfsCli,
    pub local: LocalCatalog,
    pub remote: RemoteCatalog,
}

impl Context {
    pub async fn build(cli: &crate::Cli, extra: HashMap<String, String>) -> Result<Self> {
        let mut overrides = HashMap::new();
        for (key, value) in [
            ("profile", &cli.profile),
            ("endpoint", &cli.endpoint),
            ("s3_prefix", &cli.s3_prefix),
            ("snapshot_prefix", &cli.snapshot_prefix),
        ] {
            if let Some(value) = value {
                overrides.insert(key.to_string(), value.clone());
            }
        }
        overrides.extend(extra);

        let settings = Settings::resolve(cli.config.as_deref(), overrides)?;
        let filesystem = cli.filesystem.clone();
        let fs = Some(filesystem.as_str());
        let s3_prefix = settings.require("s3_prefix", fs)?.to_string();
        let snapshot_prefix = settings.require("snapshot_prefix", fs)?.to_string();

        let store = S3Store::connect(&settings, &filesystem).await?;
        let zfs = ZfsCli::new();
        let local = LocalCatalog::load(&zfs, &filesystem, &snapshot_prefix).await?;
        let remote =
            RemoteCatalog::load(&store, &s3_prefix, &filesystem, &snapshot_prefix).await?;

        Ok(Self {
            settings,
            filesystem,
            s3_prefix,
            snapshot_prefix,
            store,
            zfs,
            local,
            remote,
        })
    }
}
