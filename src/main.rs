//! GiftScan daemon entry point: assembles `AppState` explicitly (no
//! global singletons, §9) and runs the scan loop until shutdown.

mod adapters;
mod alerter;
mod config;
mod db;
mod detector;
mod digest;
mod fees;
mod models;
mod normalizer;
mod ratelimit;
mod reconciler;
mod scanner;
mod sink;
mod stats;
mod valuation;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adapters::bulk_aggregator::BulkIndexedAggregator;
use adapters::html_scraper::HtmlScraperAdapter;
use adapters::narrow_band::NarrowBandAggregator;
use adapters::token_authed::TokenAuthedAdapter;
use adapters::virtual_marketplace::{SharedUpstreamCache, VirtualMarketplaceAdapter};
use adapters::MarketplaceAdapter;
use alerter::Alerter;
use config::Config;
use db::Db;
use detector::OpportunityDetector;
use digest::DigestBuilder;
use sink::{LoggingCacheInvalidator, LoggingSink};

#[derive(Parser, Debug)]
#[command(name = "giftscan", about = "NFT-gift market surveillance and arbitrage engine")]
struct Cli {
    /// Run a single scan tick and exit, instead of looping forever.
    #[arg(long)]
    once: bool,
}

struct AppState {
    db: Db,
    adapters: Vec<Arc<dyn MarketplaceAdapter>>,
    sink: LoggingSink,
    cache: Arc<LoggingCacheInvalidator>,
}

fn build_adapters(cfg: &Config) -> Vec<Arc<dyn MarketplaceAdapter>> {
    let bulk: Arc<dyn MarketplaceAdapter> =
        Arc::new(BulkIndexedAggregator::new(cfg.tonapi_key.clone(), cfg.default_limits.clone()));
    let shared_cache = SharedUpstreamCache::new(bulk.clone(), cfg.scan_interval);

    vec![
        bulk,
        Arc::new(VirtualMarketplaceAdapter::new("getgems_virtual", "GetGems", shared_cache.clone())),
        Arc::new(VirtualMarketplaceAdapter::new("mrkt_virtual", "MRKT", shared_cache)),
        Arc::new(HtmlScraperAdapter::new("https://fragment.com/gifts", cfg.default_limits.clone())),
        Arc::new(TokenAuthedAdapter::new(
            "https://portals-market.com/api",
            cfg.portals_auth_token.clone(),
            cfg.portals_secret.clone(),
            cfg.default_limits.clone(),
        )),
        Arc::new(NarrowBandAggregator::new("https://t.me/market", cfg.default_limits.clone())),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    info!(database_path = %cfg.database_path, scan_interval_secs = cfg.scan_interval.as_secs(), "starting giftscan");

    let db = Db::open(&cfg.database_path)?;
    let adapters = build_adapters(&cfg);
    let state = AppState {
        db,
        adapters,
        sink: LoggingSink,
        cache: Arc::new(LoggingCacheInvalidator),
    };

    let detector = OpportunityDetector::new();
    let alerter = Alerter::new(&cfg, &state.sink);
    let scanner = scanner::Scanner::new(state.adapters.clone(), state.db.clone(), state.cache.clone());

    if cli.once {
        scanner.run_tick_once(&cfg, &detector, &alerter).await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let digest_handle = spawn_digest_loop(state.db.clone(), cfg.clone(), detector_handle(&detector));

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    scanner.run(&cfg, &detector, &alerter, shutdown_rx).await;
    digest_handle.abort();
    Ok(())
}

/// The digest loop needs its own `OpportunityDetector` since rare-at-floor
/// dedup state is tick-scoped, not shared with the scanner's.
fn detector_handle(_scanner_detector: &OpportunityDetector) -> OpportunityDetector {
    OpportunityDetector::new()
}

fn spawn_digest_loop(db: Db, cfg: Config, detector: OpportunityDetector) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sent = None;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            if digest::should_send(last_sent, now, cfg.digest_interval) {
                let builder = DigestBuilder::new(&db, &cfg, &detector);
                match builder.build(now) {
                    Ok(text) => {
                        info!("{}", text);
                        last_sent = Some(now);
                    }
                    Err(e) => tracing::warn!(error = %e, "digest build failed"),
                }
            }
        }
    })
}
