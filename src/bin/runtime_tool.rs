use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use workspace_runtime::{
    DeviceClass, FileSnapshotStore, PersistenceClient, RuntimeCachePolicy, WorkspaceId,
};

#[derive(Parser)]
#[command(name = "workspace-runtime-tool")]
#[command(about = "Developer tooling for workspace runtime snapshot stores")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored workspaces with their revisions.
    List { dir: PathBuf },
    /// Print one stored snapshot as JSON.
    Show { dir: PathBuf, workspace: String },
    /// Print the default cache policy as JSON.
    Policy {
        #[arg(long, value_enum, default_value_t = DeviceClassArg::Standard)]
        device_class: DeviceClassArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceClassArg {
    Standard,
    Constrained,
}

impl From<DeviceClassArg> for DeviceClass {
    fn from(value: DeviceClassArg) -> Self {
        match value {
            DeviceClassArg::Standard => DeviceClass::Standard,
            DeviceClassArg::Constrained => DeviceClass::Constrained,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::List { dir } => list_records(&dir).await,
        Command::Show { dir, workspace } => show_record(&dir, &workspace).await,
        Command::Policy { device_class } => {
            let policy = RuntimeCachePolicy::for_device_class(device_class.into());
            println!("{}", serde_json::to_string_pretty(&policy)?);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("workspace_runtime=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(dir: &Path) -> Result<FileSnapshotStore> {
    if !dir.is_dir() {
        return Err(anyhow!("Snapshot directory '{}' does not exist", dir.display()));
    }
    FileSnapshotStore::open(dir)
        .await
        .with_context(|| format!("Failed to open snapshot store at '{}'", dir.display()))
}

async fn list_records(dir: &Path) -> Result<()> {
    let store = open_store(dir).await?;
    let records = store
        .list()
        .await
        .with_context(|| format!("Failed to list snapshots in '{}'", dir.display()))?;

    if records.is_empty() {
        println!("No stored workspaces in {}", dir.display());
        return Ok(());
    }

    println!("{:<32} {:>10}  {}", "WORKSPACE", "REVISION", "UPDATED");
    for record in records {
        println!(
            "{:<32} {:>10}  {}",
            record.workspace_id,
            record.revision,
            record.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn show_record(dir: &Path, workspace: &str) -> Result<()> {
    let store = open_store(dir).await?;
    let workspace_id = WorkspaceId::from(workspace);
    let stored = store
        .read(&workspace_id)
        .await
        .with_context(|| format!("Failed to read snapshot for '{}'", workspace))?
        .ok_or_else(|| anyhow!("No stored snapshot for workspace '{}'", workspace))?;

    println!("{}", serde_json::to_string_pretty(&stored.snapshot)?);
    Ok(())
}
