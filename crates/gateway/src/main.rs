//! fsgate
//!
//! File storage gateway with signed, time-bounded delivery URLs.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateway::app::Gateway;
use gateway::config::Config;
use gateway::storage::{Visibility, WriteOptions};
use serde_json::Map;
use tracing_appender::non_blocking::WorkerGuard;

/// fsgate - file storage gateway with signed delivery URLs.
#[derive(Parser, Debug)]
#[command(name = "fsgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the delivery endpoint over HTTP
    Serve,

    /// Print a URL for a stored file
    Url {
        /// Path of the file
        path: String,

        /// Mint an expiring URL instead of a permanent one
        #[arg(long, short)]
        temporary: bool,

        /// Lifetime in seconds (implies --temporary; default from config)
        #[arg(long, value_name = "SECS")]
        expires: Option<u64>,
    },

    /// Upload a local file
    Put {
        /// Local file to read
        source: PathBuf,

        /// Destination path in storage
        destination: String,

        /// Store the file as private
        #[arg(long)]
        private: bool,
    },

    /// Download a stored file
    Get {
        /// Path of the file
        path: String,

        /// Write to this file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List stored files and directories
    Ls {
        /// Directory to list (default: root)
        path: Option<String>,

        /// Include the whole subtree
        #[arg(long)]
        deep: bool,

        /// Print entries as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Delete a stored file or directory
    Rm {
        /// Path to delete
        path: String,

        /// Delete a directory and everything below it
        #[arg(long)]
        dir: bool,
    },

    /// Print the checksum of a stored file
    Checksum {
        /// Path of the file
        path: String,

        /// Algorithm: md5 or sha256
        #[arg(long, default_value = "md5")]
        algo: String,
    },

    /// Show metadata of a stored file
    Stat {
        /// Path of the file
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.to_lowercase()
    };
    let _guard = init_tracing(&level, config.server.log_dir.as_deref())?;

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let gateway = Gateway::from_config(config)?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("fsgate starting...");
            gateway.serve().await?;
        }
        Commands::Url {
            path,
            temporary,
            expires,
        } => {
            let fs = gateway.filesystem();
            let url = if temporary || expires.is_some() {
                let lifetime = expires
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| gateway.config().default_expiry());
                let expires_at = expiry_instant(SystemTime::now(), lifetime)?;
                fs.temporary_url(&path, expires_at, &Map::new())?
            } else {
                fs.public_url(&path, &Map::new())?
            };
            if url.is_empty() {
                anyhow::bail!(
                    "{} storage cannot produce URLs",
                    fs.adapter().name()
                );
            }
            println!("{}", url);
        }
        Commands::Put {
            source,
            destination,
            private,
        } => {
            let mut file = File::open(&source)
                .with_context(|| format!("Failed to open {}", source.display()))?;
            let options = if private {
                WriteOptions::with_visibility(Visibility::Private)
            } else {
                WriteOptions::default()
            };
            gateway
                .filesystem()
                .write_stream(&destination, &mut file, &options)?;
            println!("Stored {} as {}", source.display(), destination);
        }
        Commands::Get { path, output } => {
            let contents = gateway.filesystem().read(&path)?;
            write_output(output.as_deref(), &contents)?;
        }
        Commands::Ls { path, deep, json } => {
            let entries = gateway
                .filesystem()
                .list_contents(path.as_deref().unwrap_or(""), deep)?;
            for entry in entries {
                if json {
                    println!("{}", serde_json::to_string(&entry)?);
                } else if entry.is_dir() {
                    println!("{}/", entry.path);
                } else {
                    println!(
                        "{:>12}  {}",
                        entry.file_size.unwrap_or_default(),
                        entry.path
                    );
                }
            }
        }
        Commands::Rm { path, dir } => {
            if dir {
                gateway.filesystem().delete_directory(&path)?;
            } else {
                gateway.filesystem().delete(&path)?;
            }
            println!("Deleted {}", path);
        }
        Commands::Checksum { path, algo } => {
            let checksum = gateway.filesystem().checksum(&path, &algo)?;
            if checksum.is_empty() {
                anyhow::bail!(
                    "{} storage cannot compute checksums",
                    gateway.filesystem().adapter().name()
                );
            }
            println!("{}  {}", checksum, path);
        }
        Commands::Stat { path } => {
            let fs = gateway.filesystem();
            if !fs.file_exists(&path)? {
                anyhow::bail!("File not found: {}", path);
            }
            println!("path:          {}", fs.path(&path));
            println!("size:          {}", fs.file_size(&path)?);
            println!("mime_type:     {}", fs.mime_type(&path)?);
            println!("last_modified: {}", fs.last_modified(&path)?);
            println!("visibility:    {}", fs.visibility(&path)?);
        }
    }

    Ok(())
}

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `log_dir` is set. The returned guard flushes the file writer on drop.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    let Some(log_dir) = log_dir else {
        registry.init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "fsgate.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    registry
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(Some(guard))
}

fn expiry_instant(now: SystemTime, lifetime: Duration) -> Result<SystemTime> {
    match now.checked_add(lifetime) {
        Some(instant) => Ok(instant),
        None => anyhow::bail!("Expiry of {} seconds is out of range", lifetime.as_secs()),
    }
}

fn write_output(output: Option<&Path>, contents: &[u8]) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(contents)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
