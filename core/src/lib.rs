pub mod config;
pub mod error;
pub mod integrity;
pub mod orchestrate;
pub mod pair;
pub mod pipeline;
pub mod remote;
pub mod snapshot;

pub use config::Settings;
pub use error::{Error, Result};
pub use integrity::{BrokenReason, Health, IntegrityChecker};
pub use orchestrate::{BackupOrchestrator, RestoreOrchestrator, Uploaded};
pub use pair::PairResolver;
pub use pipeline::{humanize, PipelineBuilder, PipelineRunner, Stage, StoreAction, TransferPlan};
pub use remote::{ObjectStore, RemoteCatalog, RemoteObject, RemoteSnapshot};
pub use snapshot::{LocalCatalog, LocalSnapshot, SnapshotRow, SnapshotSource};
