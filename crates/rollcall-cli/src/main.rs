use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Inference on a large image can take a while on CPU.
const METHOD_TIMEOUT: Duration = Duration::from_secs(30);

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn enroll(&self, identifier: &str, name: &str, image: &[u8]) -> zbus::Result<(bool, String)>;
    async fn recognize(&self, image: &[u8], threshold: f64) -> zbus::Result<(bool, String, f64, String)>;
    async fn check_user(&self, identifier: &str) -> zbus::Result<(bool, String)>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Rollcall face enrollment and recognition CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a face, replacing any earlier one for the same ID
    Enroll {
        /// Student/employee number
        #[arg(long = "id")]
        identifier: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Image file containing one face
        image: PathBuf,
    },
    /// Identify the face in an image
    Recognize {
        image: PathBuf,
        /// Override the daemon's match threshold (cosine similarity)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Check whether an ID is registered
    Check { identifier: String },
    /// List registered identities
    List,
    /// Show daemon status
    Status,
}

/// Entries stored without a name are shown under a placeholder.
fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "User"
    } else {
        name
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn format_score(score: f64) -> String {
    if score.is_nan() {
        "n/a".to_string()
    } else {
        format!("{score:.4}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let builder = if cli.system {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .method_timeout(METHOD_TIMEOUT)
        .build()
        .await
        .context("connecting to D-Bus")?;
    let proxy = RollcallProxy::new(&conn).await?;
    tracing::debug!(system = cli.system, "connected to rollcalld");

    match cli.command {
        Commands::Enroll {
            identifier,
            name,
            image,
        } => {
            let bytes = read_image(&image)?;
            let (success, message) = proxy.enroll(&identifier, &name, &bytes).await?;
            if success {
                println!("{identifier}: {message}");
            } else {
                println!("enrollment failed: {message}");
            }
        }
        Commands::Recognize { image, threshold } => {
            let bytes = read_image(&image)?;
            let (matched, identity, score, message) =
                proxy.recognize(&bytes, threshold.unwrap_or(-1.0)).await?;
            if matched {
                println!("{message}: {identity} (score {})", format_score(score));
            } else {
                println!("{message} (score {})", format_score(score));
            }
        }
        Commands::Check { identifier } => {
            let (exists, name) = proxy.check_user(&identifier).await?;
            if exists {
                println!("{identifier} is registered as {}", display_name(&name));
            } else if name.is_empty() {
                println!("{identifier} is not registered");
            } else {
                println!("check failed: {name}");
            }
        }
        Commands::List => {
            let json = proxy.list_identities().await?;
            let entries: Vec<serde_json::Value> =
                serde_json::from_str(&json).context("daemon returned malformed identity list")?;
            if entries.is_empty() {
                println!("No identities registered");
            }
            for entry in &entries {
                let identifier = entry["identifier"].as_str().unwrap_or_default();
                let name = entry["name"].as_str().unwrap_or_default();
                println!("{identifier}\t{}", display_name(name));
            }
        }
        Commands::Status => {
            let json = proxy.status().await?;
            let status: serde_json::Value =
                serde_json::from_str(&json).context("daemon returned malformed status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
