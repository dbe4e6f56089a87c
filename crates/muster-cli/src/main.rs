mod bulk;
mod client;
mod dataset;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client::{DaemonClient, Reply};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "muster", about = "Muster face attendance CLI")]
struct Cli {
    /// Base URL of the musterd HTTP API
    #[arg(long, global = true, env = "MUSTER_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) a person from a face image
    Enroll {
        /// Stable external identifier (e.g. employee number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        image: PathBuf,
    },
    /// Mark attendance from a face image
    Mark {
        /// Where the capture came from (e.g. "front-door")
        #[arg(long)]
        source: Option<String>,
        image: PathBuf,
    },
    /// List enrolled people
    People,
    /// Show the attendance ledger, newest first
    Attendance,
    /// Show daemon status
    Status,
    /// Enroll every `ID_Name` folder under a dataset directory
    EnrollDir { dataset: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.url);

    match cli.command {
        Commands::Enroll { id, name, image } => {
            let reply = client.enroll(&id, name.as_deref(), &image).await?;
            print_reply(reply)?;
        }
        Commands::Mark { source, image } => {
            let reply = client.mark(&image, source.as_deref()).await?;
            print_reply(reply)?;
        }
        Commands::People => print_reply(client.get("/people").await?)?,
        Commands::Attendance => print_reply(client.get("/attendance").await?)?,
        Commands::Status => print_reply(client.get("/health").await?)?,
        Commands::EnrollDir { dataset } => enroll_dir(&client, &dataset).await?,
    }

    Ok(())
}

fn print_reply(reply: Reply) -> Result<()> {
    if !reply.status.is_success() {
        bail!(
            "musterd returned {}: {}",
            reply.status,
            reply.detail().unwrap_or("no detail")
        );
    }
    println!("{}", serde_json::to_string_pretty(&reply.body)?);
    Ok(())
}

async fn enroll_dir(client: &DaemonClient, root: &Path) -> Result<()> {
    let people = dataset::scan(root)
        .with_context(|| format!("failed to read dataset {}", root.display()))?;

    let summary = bulk::enroll_all(client, &people).await?;
    println!("ok={}, fail={}", summary.ok, summary.fail);
    Ok(())
}
