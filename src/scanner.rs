//! Scanner orchestrator (§4.E): the tick loop that drives every adapter,
//! persists snapshots, reconciles listings, runs detection, and drains
//! alerts — once per `scan_interval`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::adapters::MarketplaceAdapter;
use crate::alerter::Alerter;
use crate::config::Config;
use crate::db::Db;
use crate::detector::OpportunityDetector;
use crate::models::Snapshot;
use crate::sink::CacheInvalidator;

pub struct Scanner {
    adapters: Vec<Arc<dyn MarketplaceAdapter>>,
    db: Db,
    cache: Arc<dyn CacheInvalidator>,
}

impl Scanner {
    pub fn new(adapters: Vec<Arc<dyn MarketplaceAdapter>>, db: Db, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { adapters, db, cache }
    }

    /// Run exactly one tick and return — used by `giftscan --once`.
    pub async fn run_tick_once(&self, cfg: &Config, detector: &OpportunityDetector, alerter: &Alerter<'_>) -> anyhow::Result<()> {
        self.run_tick(cfg, detector, alerter).await
    }

    /// Run the daemon's scan loop until `shutdown` fires. Each tick is
    /// independently guarded: one tick's error never aborts the loop.
    pub async fn run(
        &self,
        cfg: &Config,
        detector: &OpportunityDetector,
        alerter: &Alerter<'_>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(cfg.scan_interval);
        let mut tick_no: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick_no += 1;
                    let start = Instant::now();
                    match self.run_tick(cfg, detector, alerter).await {
                        Ok(()) => info!(tick = tick_no, elapsed_ms = start.elapsed().as_millis() as u64, "scan tick complete"),
                        Err(e) => error!(tick = tick_no, error = %e, "scan tick failed"),
                    }
                    if start.elapsed() > cfg.scan_interval {
                        counter!("giftscan_overrun_count", 1);
                        warn!(tick = tick_no, "scan tick overran its interval");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, stopping scan loop");
                        break;
                    }
                }
            }
        }
    }

    async fn run_tick(&self, cfg: &Config, detector: &OpportunityDetector, alerter: &Alerter<'_>) -> anyhow::Result<()> {
        let now = Utc::now();

        let (bulk, per_item): (Vec<_>, Vec<_>) =
            self.adapters.iter().cloned().partition(|a| a.descriptor().supports_bulk);

        let bulk_fetches = bulk.into_iter().map(|adapter| async move {
            let name = adapter.descriptor().source_name;
            match adapter.fetch_all().await {
                Ok(obs) => {
                    counter!("giftscan_adapter_success_total", 1, "source" => name);
                    obs
                }
                Err(e) => {
                    counter!("giftscan_adapter_failure_total", 1, "source" => name);
                    warn!(source = name, error = %e, "bulk adapter fetch failed, skipping");
                    Vec::new()
                }
            }
        });

        let catalog_slugs = self.db.catalog_slugs()?;
        let per_item_fetches = per_item.into_iter().flat_map(|adapter| {
            catalog_slugs.iter().cloned().map(move |slug| {
                let adapter = adapter.clone();
                async move {
                    let name = adapter.descriptor().source_name;
                    match adapter.fetch_one(&slug).await {
                        Ok(Some(obs)) => {
                            counter!("giftscan_adapter_success_total", 1, "source" => name);
                            vec![obs]
                        }
                        Ok(None) => Vec::new(),
                        Err(e) => {
                            counter!("giftscan_adapter_failure_total", 1, "source" => name);
                            warn!(source = name, slug = %slug, error = %e, "per-item adapter fetch failed, skipping");
                            Vec::new()
                        }
                    }
                }
            })
        });

        let (bulk_results, per_item_results) =
            tokio::join!(join_all(bulk_fetches), join_all(per_item_fetches));
        let observations: Vec<_> = bulk_results.into_iter().flatten().chain(per_item_results.into_iter().flatten()).collect();
        debug!(count = observations.len(), "observations collected this tick");

        let snapshots: Vec<Snapshot> = observations
            .iter()
            .map(|o| Snapshot {
                gift_slug: o.gift_slug.clone(),
                nft_address: o.nft_address.clone(),
                serial_number: o.serial_number,
                attributes: o.attributes.clone(),
                price: o.price,
                currency: o.currency,
                source: o.marketplace.clone(),
                scanned_at: now,
            })
            .collect();
        self.db.insert_snapshots(&snapshots)?;

        let mut seen_slugs = std::collections::HashSet::new();
        for o in &observations {
            if seen_slugs.insert(o.gift_slug.clone()) {
                self.db.upsert_catalog(&o.gift_slug, &o.gift_slug)?;
            }
        }

        let outcome = crate::reconciler::reconcile(&self.db, now, &observations)?;
        debug!(inserted = outcome.inserted, updated = outcome.updated, sold = outcome.sales.len(), "reconciliation complete");

        let mut opportunities = Vec::new();
        for slug in self.db.distinct_slugs()? {
            opportunities.extend(detector.detect_slug(&self.db, cfg, now, &slug)?);
            opportunities.extend(detector.rare_at_floor(&self.db, cfg, now, &slug, cfg.rare_floor_min_discount)?);
        }

        alerter.process(&opportunities).await?;

        self.cache.invalidate("market_snapshot");
        Ok(())
    }
}
