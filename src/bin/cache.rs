use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use nexus_chat_client::config::CacheConfig;
use nexus_chat_client::offline_cache::{AssetCache, AssetRequest, HttpFetcher, Interception};
use nexus_chat_client::storage::CacheStore;

#[derive(Parser, Debug)]
#[command(
    name = "nexus-cache",
    about = "Offline cache for the Nexus chat application shell",
    version
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Fetch every shell asset into the current generation
    Install,
    /// Drop every generation except the current one
    Activate,
    /// Serve one url network-first, falling back to the cache
    Get {
        /// Absolute url or a path relative to the origin
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::init();
    let config = CacheConfig::from_env()?;

    let db_path = config.cache_db.to_string_lossy().to_string();
    let store = CacheStore::new(&db_path)
        .with_context(|| format!("cannot open cache database {db_path}"))?;
    let cache = AssetCache::new(config.origin.clone(), store, HttpFetcher::new()?);

    match cli.cmd {
        Command::Install => {
            let count = cache.install().await?;
            println!("installed {count} assets into {}", cache.generation());
        }
        Command::Activate => {
            let removed = cache.activate().await?;
            println!("active generation {}; removed {}", cache.generation(), removed.len());
        }
        Command::Get { url: target } => {
            let url = config
                .origin
                .join(&target)
                .with_context(|| format!("invalid url: {target}"))?;
            info!("serving {url}");
            match cache.handle(&AssetRequest::get(url.clone())).await? {
                Interception::Respond(response) => {
                    eprintln!(
                        "{} {}",
                        response.status,
                        response.content_type.as_deref().unwrap_or("-")
                    );
                    std::io::stdout().write_all(&response.body)?;
                }
                Interception::Passthrough => {
                    eprintln!("{url} is outside {}; not handled by the cache", config.origin);
                }
            }
        }
    }
    Ok(())
}
