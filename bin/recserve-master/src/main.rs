//! Recserve Master - operator tool
//!
//! Opens the three stores named in the configuration and runs one
//! administrative or diagnostic command against them.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use recserve_common::config::Config;
use recserve_common::{Bucket, Pagination};
use recserve_retrieval::{Overview, RecommendRequest, Retriever, Scenario};
use recserve_snapshot::{Coordinator, PurgeTarget};
use recserve_storage::Stores;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "recserve-master")]
#[command(about = "Recserve control-plane operator tool")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/recserve/config.toml")]
    config: PathBuf,

    /// Node registry connection string (overrides the config file)
    #[arg(long)]
    meta_store: Option<String>,

    /// Dataset store connection string (overrides the config file)
    #[arg(long)]
    data_store: Option<String>,

    /// Cache store connection string (overrides the config file)
    #[arg(long)]
    cache_store: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write every node, user, item and feedback record to a file
    Dump {
        /// Output file
        output: PathBuf,
    },
    /// Insert the records of a dump file
    Restore {
        /// Dump file
        input: PathBuf,
    },
    /// Delete selected state
    Purge {
        /// Comma-separated targets: delete_users, delete_items,
        /// delete_feedback, delete_cache, delete_meta
        #[arg(long)]
        check_list: String,
    },
    /// Print global counters
    Stats,
    /// Print cluster membership
    Cluster,
    /// Print item categories
    Categories,
    /// Print positive feedback rates
    Rates {
        /// Days of history
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Print ranked candidates of one bucket
    Candidates {
        collection: String,
        subset: String,
        /// Bucket holds user ids instead of item ids
        #[arg(long)]
        users: bool,
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long, default_value = "0")]
        offset: i64,
        /// -1 for everything
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Print nearest neighbors of an item, or of a user with --user
    Neighbors {
        id: String,
        #[arg(long)]
        user: bool,
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Print recommendations for a user
    Recommend {
        user_id: String,
        /// Source name, or `_` for the fallback chain
        #[arg(long, default_value = "_")]
        scenario: String,
        #[arg(long, default_value = "10")]
        count: usize,
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
}

/// Read the config file if present; CLI flags take precedence.
fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("parsing {}", args.config.display()))?
    } else {
        Config::default()
    };

    if let Some(url) = &args.meta_store {
        config.database.meta_store.clone_from(url);
    }
    if let Some(url) = &args.data_store {
        config.database.data_store.clone_from(url);
    }
    if let Some(url) = &args.cache_store {
        config.database.cache_store.clone_from(url);
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(config)
}

/// Start of a `days`-long history window ending at `now`.
fn rates_since(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("{days} days of history is out of range"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

async fn dump(coordinator: &Coordinator, output: &Path) -> Result<()> {
    let file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;
    let cancel = cancel_on_interrupt();
    let (mut sink, counts) = coordinator.dump(BufWriter::new(file), &cancel).await?;
    sink.shutdown().await?;
    info!("Dump written to {}", output.display());
    print_json(&counts)
}

async fn restore(coordinator: &Coordinator, input: &Path) -> Result<()> {
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {}", input.display()))?;
    let cancel = cancel_on_interrupt();
    let counts = coordinator.restore(BufReader::new(file), &cancel).await?;
    print_json(&counts)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Config file: {}", args.config.display());
    let stores = Stores::open(&config.database).context("opening stores")?;
    info!(
        "Stores: meta={} data={} cache={}",
        stores.meta.name(),
        stores.data.name(),
        stores.cache.name()
    );

    match args.command {
        Commands::Dump { output } => {
            dump(&Coordinator::new(stores, &config.snapshot), &output).await?;
        }
        Commands::Restore { input } => {
            restore(&Coordinator::new(stores, &config.snapshot), &input).await?;
        }
        Commands::Purge { check_list } => {
            let targets = PurgeTarget::parse_list(&check_list)?;
            let cancel = cancel_on_interrupt();
            Coordinator::new(stores, &config.snapshot)
                .purge(&targets, &cancel)
                .await?;
            info!("Purged {:?}", targets);
        }
        Commands::Stats => print_json(&Overview::new(&stores, &config).stats().await?)?,
        Commands::Cluster => {
            let view = Overview::new(&stores, &config).cluster(Utc::now()).await?;
            print_json(&serde_json::json!({ "live": view.live, "stale": view.stale }))?;
        }
        Commands::Categories => {
            print_json(&Overview::new(&stores, &config).categories().await?)?;
        }
        Commands::Rates { days } => {
            let since = rates_since(Utc::now(), days)?;
            print_json(&Overview::new(&stores, &config).rates(since).await?)?;
        }
        Commands::Candidates {
            collection,
            subset,
            users,
            categories,
            offset,
            limit,
        } => {
            let retriever = Retriever::from_stores(&stores, &config.recommend)?;
            let page = Pagination::from_signed(offset, limit)?;
            let bucket = Bucket::new(collection, subset);
            if users {
                print_json(&retriever.search_users(&bucket, page).await?)?;
            } else {
                print_json(&retriever.search_items(&bucket, &categories, page).await?)?;
            }
        }
        Commands::Neighbors {
            id,
            user,
            categories,
            limit,
        } => {
            let retriever = Retriever::from_stores(&stores, &config.recommend)?;
            let page = Pagination::from_signed(0, limit)?;
            let neighbors = if user {
                retriever.user_neighbors(&id, page).await?
            } else {
                retriever.item_neighbors(&id, &categories, page).await?
            };
            print_json(&neighbors)?;
        }
        Commands::Recommend {
            user_id,
            scenario,
            count,
            categories,
        } => {
            let retriever = Retriever::from_stores(&stores, &config.recommend)?;
            let mut request = RecommendRequest::new(user_id, scenario.parse::<Scenario>()?, count);
            request.categories = categories;
            print_json(&retriever.recommend_items(&request).await?)?;
        }
    }
    Ok(())
}
