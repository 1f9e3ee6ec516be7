use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use podsync::config::Config;
use podsync::directory::DirectoryClient;
use podsync::feed::HttpFeedSource;
use podsync::storage::{Database, StoreError};
use podsync::sync::{SyncEngine, SyncOutcome};

/// Get the config directory path (~/.config/podsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("podsync"))
}

#[derive(Parser, Debug)]
#[command(name = "podsync", about = "Podcast feed subscription and catalog sync")]
struct Args {
    /// Config file (default: ~/.config/podsync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Catalog database, overriding the config file
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and store its episodes
    Subscribe { url: String },
    /// Re-fetch one feed, or every subscribed feed with --all
    Refresh {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        url: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Remove a feed and all of its episodes
    Unsubscribe { url: String },
    /// List subscribed shows
    List,
    /// List a show's episodes, newest first
    Episodes {
        url: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Search the podcast directory
    Search {
        query: String,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("podsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    if let Command::Search { query, limit } = &args.command {
        let directory = DirectoryClient::new(client, &config.directory_url)
            .context("Invalid directory_url in config")?
            .with_cache_ttl(config.search_cache_ttl());
        let results = directory
            .search(query, limit.unwrap_or(config.search_limit))
            .await?;
        if results.is_empty() {
            println!("No podcasts found for '{}'", query.trim());
        }
        for entry in results {
            match &entry.author {
                Some(author) => println!("{} - {}\n  {}", entry.title, author, entry.feed_url),
                None => println!("{}\n  {}", entry.title, entry.feed_url),
            }
        }
        return Ok(());
    }

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("podsync.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            anyhow::bail!("{}", StoreError::InstanceLocked);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open catalog {}", db_path.display()))
        }
    };

    let source = match &config.gateway_url {
        Some(gateway) => HttpFeedSource::via_gateway(client, gateway)
            .context("Invalid gateway_url in config")?,
        None => HttpFeedSource::direct(client),
    }
    .with_max_bytes(config.max_feed_bytes)
    .allow_private_hosts(config.allow_private_hosts);

    let engine = SyncEngine::new(db.clone(), source, config.sync_options());
    let result = run(&engine, args.command).await;

    db.close().await;
    result
}

async fn run(engine: &SyncEngine<HttpFeedSource>, command: Command) -> Result<()> {
    match command {
        Command::Subscribe { url } => {
            let outcome = engine.subscribe(&url).await?;
            print_outcome(&outcome);
        }
        Command::Refresh { url: Some(url), .. } => {
            let outcome = engine.refresh(&url).await?;
            print_outcome(&outcome);
        }
        Command::Refresh { url: None, .. } => {
            let results = engine.refresh_all().await?;
            let mut failed = 0;
            for r in &results {
                match &r.result {
                    Ok(outcome) => print_outcome(outcome),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", r.feed_url, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} feeds failed to refresh", failed, results.len());
            }
        }
        Command::Unsubscribe { url } => match engine.unsubscribe(&url).await? {
            Some(removed) => println!("Unsubscribed from {} ({} episodes removed)", url, removed),
            None => println!("Not subscribed to {}", url),
        },
        Command::List => {
            let shows = engine.database().get_all_shows().await?;
            if shows.is_empty() {
                println!("No subscriptions");
            }
            for show in shows {
                println!("{}\n  {}", show.title, show.feed_url);
            }
        }
        Command::Episodes { url, limit } => {
            let show = engine
                .database()
                .get_show_by_feed_url(&url)
                .await?
                .with_context(|| format!("Not subscribed to {}", url))?;
            let episodes = engine.database().get_episodes_by_show(&show.id).await?;
            println!("{} ({} episodes)", show.title, episodes.len());
            for ep in episodes.iter().take(limit) {
                let date = ep
                    .published_at
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".to_string());
                let duration = if ep.duration.is_empty() { "-" } else { ep.duration.as_str() };
                println!("{}  {:>8}  {}", date, duration, ep.title);
            }
        }
        Command::Search { .. } => {}
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    println!(
        "{}: {} episodes ({} new, {} skipped)",
        outcome.show.title,
        outcome.episodes.len(),
        outcome.new_episodes,
        outcome.skipped
    );
}
