use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use presswork::cache::{RedisCache, ResponseCache};
use presswork::config::Config;
use presswork::discovery::{
    DiscoveryOrchestrator, DiscoveryOutcome, FeedDiscoverer, MarketplaceDiscoverer,
    NewsSearchDiscoverer, SitemapDiscoverer, VideoDiscoverer,
};
use presswork::fetcher::ContentFetcher;
use presswork::generation::{GenerationOrchestrator, OllamaBackend, OpenAiBackend};
use presswork::keys::{KeyStore, SecretCipher};
use presswork::models::{KeyStatus, Provider};
use presswork::processor::Processor;
use presswork::providers::{FallbackChain, GdeltProvider, NewsDataProvider, SearchProvider};
use presswork::publish::{MarkdownPublisher, Publisher};
use presswork::storage::{
    CampaignRepository, Database, QueueStore, SharedQueueStore, SqliteQueueStore,
};

#[derive(Parser)]
#[command(
    name = "presswork",
    version,
    about = "Content discovery and rewrite pipeline with durable queue and provider failover",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (TOML); environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery for all due campaigns, or one campaign
    Discover {
        /// Campaign id to discover for
        #[arg(short = 'C', long)]
        campaign: Option<String>,
    },

    /// Process pending queue items
    Process {
        /// Maximum items to process in this batch
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Only process items belonging to this campaign
        #[arg(short = 'C', long)]
        campaign: Option<String>,
    },

    /// Reclaim stuck items, purge old ones, reset quota counters
    Maintain,

    /// Manage provider credentials
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Print Prometheus metrics for the current process
    Metrics,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Add a credential (secret read from stdin)
    Add {
        /// Provider name (openai, ollama, newsdata, gdelt)
        provider: String,

        /// Human-readable label
        #[arg(short, long, default_value = "default")]
        label: String,

        /// Daily request quota (0 = unlimited)
        #[arg(long, default_value = "0")]
        daily_quota: i64,

        /// Monthly request quota (0 = unlimited)
        #[arg(long, default_value = "0")]
        monthly_quota: i64,
    },

    /// List stored credentials
    List {
        /// Filter by provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Deactivate a credential without deleting it
    Disable {
        /// Key id
        id: String,
    },

    /// Delete a credential
    Remove {
        /// Key id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    if let Err(e) = presswork::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    match cli.command {
        Commands::Discover { campaign } => discover(&config, campaign).await?,
        Commands::Process { limit, campaign } => process(&config, limit, campaign).await?,
        Commands::Maintain => maintain(&config).await?,
        Commands::Keys { command } => keys(&config, command)?,
        Commands::Metrics => {
            print!(
                "{}",
                presswork::metrics::encode_metrics()
                    .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?
            );
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("presswork=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("presswork=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Shared handles for the pipeline commands
struct AppContext {
    queue: SharedQueueStore,
    campaigns: Arc<CampaignRepository>,
    keys: Arc<KeyStore>,
    fetcher: Arc<ContentFetcher>,
}

impl AppContext {
    async fn build(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        let queue: SharedQueueStore = Arc::new(SqliteQueueStore::new(db.clone()));
        let campaigns = Arc::new(CampaignRepository::new(db.clone()));
        let keys = Arc::new(KeyStore::new(db, secret_cipher()?));

        let mut fetcher = ContentFetcher::new(&config.fetcher)?;
        if let Some(cache) = RedisCache::try_new(&config.cache).await {
            fetcher = fetcher.with_cache(Arc::new(cache) as Arc<dyn ResponseCache>);
        }

        Ok(Self {
            queue,
            campaigns,
            keys,
            fetcher: Arc::new(fetcher),
        })
    }
}

/// Derive the credential cipher from the process-wide secret
fn secret_cipher() -> Result<SecretCipher> {
    let passphrase = std::env::var("PRESSWORK_SECRET")
        .context("PRESSWORK_SECRET must be set to encrypt and decrypt credentials")?;
    Ok(SecretCipher::new(&passphrase))
}

async fn discover(config: &Config, campaign_id: Option<String>) -> Result<()> {
    let ctx = AppContext::build(config).await?;

    let client = reqwest::Client::new();
    let chain = Arc::new(FallbackChain::new(
        vec![
            Arc::new(NewsDataProvider::new(client.clone())) as Arc<dyn SearchProvider>,
            Arc::new(GdeltProvider::new(client)) as Arc<dyn SearchProvider>,
        ],
        ctx.keys.clone(),
    ));

    let orchestrator = DiscoveryOrchestrator::new(ctx.queue.clone(), ctx.campaigns.clone())
        .register(Arc::new(FeedDiscoverer::new(ctx.fetcher.clone())))
        .register(Arc::new(SitemapDiscoverer::new(ctx.fetcher.clone())))
        .register(Arc::new(VideoDiscoverer::new(ctx.fetcher.clone())))
        .register(Arc::new(MarketplaceDiscoverer::new(ctx.fetcher.clone())))
        .register(Arc::new(NewsSearchDiscoverer::new(chain)));

    match campaign_id {
        Some(id) => {
            let campaign = ctx
                .campaigns
                .get(&id)?
                .with_context(|| format!("Campaign not found: {id}"))?;
            match orchestrator.discover(&campaign).await? {
                DiscoveryOutcome::Completed {
                    found,
                    enqueued,
                    skipped,
                } => {
                    println!("Discovered {found} items: {enqueued} enqueued, {skipped} skipped");
                }
                DiscoveryOutcome::NotDue => println!("Campaign {id} is not due for discovery"),
                DiscoveryOutcome::Inactive => println!("Campaign {id} is not active"),
            }
        }
        None => {
            let totals = orchestrator.discover_all().await;
            println!(
                "Discovery sweep: {} campaigns succeeded, {} failed, {} skipped, {} items enqueued",
                totals.succeeded, totals.failed, totals.skipped, totals.items_enqueued
            );
        }
    }

    Ok(())
}

async fn process(config: &Config, limit: usize, campaign_id: Option<String>) -> Result<()> {
    let ctx = AppContext::build(config).await?;

    let client = reqwest::Client::new();
    let generator = Arc::new(
        GenerationOrchestrator::new(
            ctx.keys.clone(),
            ctx.campaigns.clone(),
            config.generation.max_concurrent,
            config.generation.acquire_attempts as usize,
        )
        .register_backend(Arc::new(OpenAiBackend::new(
            client.clone(),
            &config.generation.openai_base_url,
        )))
        .register_backend(Arc::new(OllamaBackend::new(
            client,
            &config.generation.ollama_endpoint,
        ))),
    );

    let publisher =
        Arc::new(MarkdownPublisher::new(&config.pipeline.output_dir)?) as Arc<dyn Publisher>;

    let processor = Processor::new(ctx.queue.clone(), ctx.fetcher.clone(), generator, publisher);
    let totals = processor.process_batch(limit, campaign_id.as_deref()).await?;

    println!(
        "Processed batch: {} published, {} failed, {} skipped",
        totals.published, totals.failed, totals.skipped
    );
    Ok(())
}

async fn maintain(config: &Config) -> Result<()> {
    let db = Database::open(&config.database.path)?;
    let queue = SqliteQueueStore::new(db.clone());
    let campaigns = CampaignRepository::new(db.clone());
    let keys = KeyStore::new(db.clone(), secret_cipher()?);

    let reclaimed = queue.reclaim_stuck(Duration::from_secs(
        config.pipeline.reclaim_after_mins as u64 * 60,
    ))?;
    let purged = queue.purge_completed(Duration::from_secs(
        config.pipeline.purge_after_days as u64 * 86_400,
    ))?;
    let unstuck = campaigns.reset_stuck_discoveries(Duration::from_secs(
        config.pipeline.discovery_stuck_after_mins as u64 * 60,
    ))?;

    // Date-marker guards make the resets idempotent across repeated runs
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut daily_reset = 0;
    if db.load_state("daily_reset_on")?.as_deref() != Some(today.as_str()) {
        daily_reset = keys.reset_daily_counters()?;
        db.save_state("daily_reset_on", &today)?;
    }

    let month = Utc::now().format("%Y-%m").to_string();
    let mut monthly_reset = 0;
    if db.load_state("monthly_reset_on")?.as_deref() != Some(month.as_str()) {
        monthly_reset = keys.reset_monthly_counters()?;
        db.save_state("monthly_reset_on", &month)?;
    }

    println!(
        "Maintenance: {reclaimed} items reclaimed, {purged} purged, {unstuck} discoveries unstuck, \
         {daily_reset} daily and {monthly_reset} monthly counters reset"
    );
    Ok(())
}

fn keys(config: &Config, command: KeyCommands) -> Result<()> {
    let db = Database::open(&config.database.path)?;
    let keys = KeyStore::new(db, secret_cipher()?);

    match command {
        KeyCommands::Add {
            provider,
            label,
            daily_quota,
            monthly_quota,
        } => {
            let provider = Provider::from_str_opt(&provider)
                .with_context(|| format!("Unknown provider: {provider}"))?;

            eprint!("Secret: ");
            let mut secret = String::new();
            std::io::stdin()
                .read_line(&mut secret)
                .context("Failed to read secret from stdin")?;

            let key = keys.add_key(provider, secret.trim(), &label, daily_quota, monthly_quota)?;
            println!("Added key {} for {}", key.id, provider);
        }

        KeyCommands::List { provider } => {
            let provider = provider
                .map(|p| {
                    Provider::from_str_opt(&p).with_context(|| format!("Unknown provider: {p}"))
                })
                .transpose()?;

            let stored = keys.list(provider)?;
            if stored.is_empty() {
                println!("No keys stored");
                return Ok(());
            }
            for key in stored {
                println!(
                    "{}  {}  {}  status={}  today={}/{}  month={}/{}",
                    key.id,
                    key.provider,
                    key.label,
                    key.status.as_str(),
                    key.requests_today,
                    quota_display(key.daily_quota),
                    key.requests_month,
                    quota_display(key.monthly_quota),
                );
            }
        }

        KeyCommands::Disable { id } => {
            keys.set_status(&id, KeyStatus::Inactive)?;
            println!("Disabled key {id}");
        }

        KeyCommands::Remove { id } => {
            if keys.delete_key(&id)? {
                println!("Removed key {id}");
            } else {
                println!("No key with id {id}");
            }
        }
    }

    Ok(())
}

fn quota_display(quota: i64) -> String {
    if quota == 0 {
        String::from("unlimited")
    } else {
        quota.to_string()
    }
}
