//! fybrk CLI
//!
//! Drives the core engine through its three operations:
//! - `scan` - walk the sync directory and update the catalog
//! - `list` - print tracked files
//! - `sync` - run continuous replication with paired peers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fybrk_sync::{EngineConfig, SyncEngine};

#[derive(Parser)]
#[command(name = "fybrk")]
#[command(about = "Peer-to-peer encrypted file synchronizer")]
#[command(version)]
struct Cli {
    /// Directory to synchronize
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the sync directory and update the catalog
    Scan,

    /// List tracked files
    List,

    /// Run continuous synchronization with paired peers
    Sync {
        /// Port to listen on (0 = OS-chosen)
        #[arg(short, long, default_value_t = 42000)]
        port: u16,

        /// Peer address to connect to (host:port), repeatable
        #[arg(short = 'P', long = "peer")]
        peers: Vec<String>,

        /// Seconds between periodic full rescans
        #[arg(long, default_value_t = 300)]
        rescan_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan => {
            let engine = Arc::new(SyncEngine::open(&cli.dir, EngineConfig::default())?);
            let scanner = engine.clone();
            let changed = tokio::task::spawn_blocking(move || scanner.scan()).await??;
            println!("scan complete: {changed} file(s) updated");
            print_file_list(&engine)?;
            engine.close();
        }

        Commands::List => {
            let engine = Arc::new(SyncEngine::open(&cli.dir, EngineConfig::default())?);
            print_file_list(&engine)?;
            engine.close();
        }

        Commands::Sync {
            port,
            peers,
            rescan_secs,
        } => {
            let config = EngineConfig {
                peer_addrs: peers,
                ..EngineConfig::default()
            };
            let engine = Arc::new(SyncEngine::open(&cli.dir, config)?);

            let scanner = engine.clone();
            tokio::task::spawn_blocking(move || scanner.scan()).await??;
            engine.enable_replication(port).await?;
            info!(
                port = engine.replication_port().unwrap_or(port),
                device = %engine.device_id(),
                "synchronizing; press ctrl-c to stop"
            );

            let mut rescan = tokio::time::interval(Duration::from_secs(rescan_secs.max(1)));
            rescan.tick().await; // first tick is immediate; scan already ran
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = rescan.tick() => {
                        let scanner = engine.clone();
                        match tokio::task::spawn_blocking(move || scanner.scan()).await {
                            Ok(Ok(changed)) if changed > 0 => {
                                info!(changed, "periodic rescan updated catalog");
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!(error = %e, "periodic rescan failed"),
                            Err(e) => warn!(error = %e, "rescan task failed"),
                        }
                    }
                }
            }

            info!("shutting down");
            engine.close();
        }
    }

    Ok(())
}

fn print_file_list(engine: &SyncEngine) -> Result<()> {
    let files = engine.list()?;
    if files.is_empty() {
        println!("no tracked files");
        return Ok(());
    }
    println!("{:<50} {:>12} {:>8}  {}", "PATH", "SIZE", "VERSION", "HASH");
    for meta in files {
        println!(
            "{:<50} {:>12} {:>8}  {}",
            meta.path,
            meta.size,
            meta.version,
            &meta.hash.to_hex()[..16]
        );
    }
    Ok(())
}
