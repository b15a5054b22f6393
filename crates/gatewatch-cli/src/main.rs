use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gatewatch_core::{Embedding, EuclideanMatcher, GalleryStore, Identification, Matcher};
use gatewatch_notify::{HttpUploadTransport, TransportConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gatewatch", about = "gatewatch gallery and notification tool")]
struct Cli {
    /// Gallery file (defaults to $XDG_DATA_HOME/gatewatch/gallery.json)
    #[arg(long, global = true, env = "GATEWATCH_GALLERY_PATH")]
    gallery: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled users
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled user
    Remove {
        /// Name given at enrollment
        name: String,
    },
    /// Classify an embedding against the gallery
    Match {
        /// Embedding as a JSON array of numbers
        #[arg(long)]
        embedding: String,
        /// Maximum distance for a positive match
        #[arg(long, env = "GATEWATCH_TOLERANCE", default_value_t = gatewatch_core::DEFAULT_TOLERANCE)]
        tolerance: f32,
    },
    /// Send a test notification through a transport
    Send {
        message: String,
        /// JPEG to attach
        #[arg(long)]
        image: Option<PathBuf>,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Query an upload receiver's status endpoint
    Status {
        /// Receiver base URL
        #[arg(long, env = "GATEWATCH_HTTP_URL")]
        url: String,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportKind {
    Log,
    Http,
    Telegram,
}

#[derive(clap::Args)]
struct TransportArgs {
    #[arg(long, value_enum, env = "GATEWATCH_TRANSPORT", default_value = "log")]
    transport: TransportKind,
    #[arg(long, env = "GATEWATCH_HTTP_URL")]
    url: Option<String>,
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long, env = "CHAT_ID")]
    chat_id: Option<String>,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

impl TransportArgs {
    fn config(&self) -> Result<TransportConfig> {
        Ok(match self.transport {
            TransportKind::Log => TransportConfig::Log,
            TransportKind::Http => TransportConfig::Http {
                url: self.url.clone().context("--url is required for the http transport")?,
            },
            TransportKind::Telegram => TransportConfig::Telegram {
                token: self
                    .token
                    .clone()
                    .context("--token is required for the telegram transport")?,
                chat_id: self
                    .chat_id
                    .clone()
                    .context("--chat-id is required for the telegram transport")?,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let gallery_path = cli.gallery.unwrap_or_else(default_gallery_path);

    match cli.command {
        Commands::List { json } => {
            let store = open_store(&gallery_path)?;
            let gallery = store.snapshot();
            if json {
                let users: Vec<_> = gallery
                    .identities()
                    .iter()
                    .map(|i| serde_json::json!({ "name": i.name(), "samples": i.samples().len() }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if gallery.is_empty() {
                println!("No users enrolled");
            } else {
                println!("{:<24} SAMPLES", "NAME");
                for identity in gallery.identities() {
                    println!("{:<24} {}", identity.name(), identity.samples().len());
                }
            }
        }
        Commands::Remove { name } => {
            let store = open_store(&gallery_path)?;
            let removed = store.remove(&name)?;
            println!(
                "Removed {} ({} samples)",
                removed.name(),
                removed.samples().len()
            );
        }
        Commands::Match {
            embedding,
            tolerance,
        } => {
            let probe = parse_embedding(&embedding)?;
            let store = open_store(&gallery_path)?;
            let gallery = store.snapshot();
            if let Some(dim) = gallery.dim() {
                if dim != probe.dim() {
                    bail!("embedding has {} values, gallery expects {dim}", probe.dim());
                }
            }
            match EuclideanMatcher.classify(&probe, &gallery, tolerance) {
                Identification::Known { name, distance } => {
                    println!("{name} (distance {distance:.4})")
                }
                Identification::Unknown => println!("Unknown"),
            }
        }
        Commands::Send {
            message,
            image,
            transport,
        } => {
            let config = transport.config()?;
            let transport = config
                .build(Duration::from_secs(transport.timeout_secs))
                .context("failed to build transport")?;
            let image = match image {
                Some(path) => Some(
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            transport.send(&message, image.as_deref()).await?;
            println!("Sent via {}", config.kind());
        }
        Commands::Status { url, timeout_secs } => {
            let receiver = HttpUploadTransport::new(&url, Duration::from_secs(timeout_secs))?;
            let status = receiver
                .check_status()
                .await
                .with_context(|| format!("receiver at {url} not reachable"))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<GalleryStore> {
    GalleryStore::open(path)
        .with_context(|| format!("failed to open gallery {}", path.display()))
}

fn default_gallery_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("gatewatch/gallery.json")
}

fn parse_embedding(raw: &str) -> Result<Embedding> {
    let values: Vec<f32> =
        serde_json::from_str(raw).context("embedding must be a JSON array of numbers")?;
    if values.is_empty() {
        bail!("embedding is empty");
    }
    Ok(Embedding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_embedding() {
        assert_eq!(parse_embedding("[0.5, -1, 2.25]").unwrap().dim(), 3);
        assert!(parse_embedding("[]").is_err());
        assert!(parse_embedding("{\"a\": 1}").is_err());
    }

    #[test]
    fn test_transport_args() {
        let cli = Cli::try_parse_from([
            "gatewatch",
            "send",
            "hello",
            "--transport",
            "http",
            "--url",
            "http://127.0.0.1:8000",
        ])
        .unwrap();
        let Commands::Send { transport, .. } = cli.command else {
            panic!("expected send");
        };
        assert_eq!(
            transport.config().unwrap(),
            TransportConfig::Http {
                url: "http://127.0.0.1:8000".into()
            }
        );

        let missing = TransportArgs {
            transport: TransportKind::Http,
            url: None,
            token: None,
            chat_id: None,
            timeout_secs: 30,
        };
        assert!(missing.config().is_err());
    }

    #[test]
    fn test_remove_via_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("gallery.json");
        let store = open_store(&path).unwrap();
        store
            .append("bob", vec![Embedding::new(vec![1.0, 2.0])])
            .unwrap();

        let reopened = open_store(&path).unwrap();
        assert_eq!(reopened.remove("bob").unwrap().name(), "bob");
        assert!(open_store(&path).unwrap().snapshot().is_empty());
    }
}
