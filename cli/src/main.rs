mod commands;

use clap::{Parser, Subcommand};
use commands::{backup::BackupCommand, restore::RestoreCommand, status::StatusCommand};
use snapferry_core::Result;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "snapferry",
    about = "Incremental ZFS snapshot replication to S3-compatible storage",
    long_about = "Snapferry ships local ZFS snapshots to an object store as full or \
                  incremental streams and restores them on demand"
)]
pub struct Cli {
    #[arg(help = "The ZFS dataset/filesystem to operate on")]
    filesystem: String,

    #[arg(long, help = "Override configuration file path")]
    config: Option<PathBuf>,

    #[arg(long, help = "Use a non-default AWS profile")]
    profile: Option<String>,

    #[arg(long, help = "Use a non-AWS S3 endpoint (e.g. Wasabi)")]
    endpoint: Option<String>,

    #[arg(long, help = "Object key prefix")]
    s3_prefix: Option<String>,

    #[arg(long, help = "Only operate on snapshots whose label starts with this prefix")]
    snapshot_prefix: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Back up local snapshots to the object store")]
    Backup(BackupCommand),

    #[command(about = "Restore a snapshot chain from the object store")]
    Restore(RestoreCommand),

    #[command(about = "Show backup status of local and remote snapshots")]
    Status(StatusCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match run(&cli).await {
        Ok(()) => {}
        // expected conditions are reported, not crashed on
        Err(err) if err.is_soft() => {
            eprintln!("{err}");
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Backup(cmd)) => cmd.run(cli).await,
        Some(Commands::Restore(cmd)) => cmd.run(cli).await,
        Some(Commands::Status(cmd)) => cmd.run(cli).await,
        None => StatusCommand::default().run(cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("snapferry={level}")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
