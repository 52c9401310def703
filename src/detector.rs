//! Opportunity detector (§4.H): turns the current active-listing set and
//! sales history into ranked arbitrage/undervalued signals, plus the
//! rare-at-floor sub-detector. Grounded in the reference scanner's
//! `rare_detector.py` and `arbitrage_orchestrator.py`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::db::Db;
use crate::models::{Listing, RarityTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpportunityKind {
    /// Listed well below fair value — just buy it.
    Undervalued,
    /// Confident fair value supports buying here and reselling elsewhere.
    Arbitrage,
    /// Same shape as `Arbitrage` but fair value confidence is too low to
    /// trust outright (cold start).
    ArbitrageUnconfirmed,
    /// A rare/ultra-rare item listed near the common floor.
    RareAtFloor,
}

#[derive(Debug, Clone)]
pub struct Opportunity {
    pub gift_slug: String,
    pub kind: OpportunityKind,
    pub tier: RarityTier,
    pub buy_source: String,
    pub sell_source: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub confidence: f64,
}

/// Premium multiplier applied to the common floor when fewer than
/// `min_sales_for_confidence` tier-specific sales exist.
fn default_premium(tier: RarityTier) -> Decimal {
    match tier {
        RarityTier::UltraRare => Decimal::new(50, 1),
        RarityTier::Rare => Decimal::new(25, 1),
        RarityTier::Uncommon => Decimal::new(13, 1),
        RarityTier::Common | RarityTier::Unknown => Decimal::new(10, 1),
    }
}

pub struct OpportunityDetector {
    /// nft_address -> last-alerted instant, for rare-at-floor dedup.
    rare_alerted: Mutex<HashMap<String, Instant>>,
}

impl OpportunityDetector {
    pub fn new() -> Self {
        Self { rare_alerted: Mutex::new(HashMap::new()) }
    }

    /// Branch A/B detection for one gift slug: groups the latest
    /// per-(slug, source) listings by rarity tier — never compares across
    /// tiers — and runs each group independently against fair value (or,
    /// cold-start, against the rest of that tier's active set).
    pub fn detect_slug(&self, db: &Db, cfg: &Config, now: DateTime<Utc>, gift_slug: &str) -> anyhow::Result<Vec<Opportunity>> {
        let listings = db.active_listings_for_slug(gift_slug)?;

        let mut by_tier: HashMap<RarityTier, Vec<Listing>> = HashMap::new();
        for l in listings {
            by_tier.entry(l.rarity_tier).or_default().push(l);
        }

        let mut out = Vec::new();
        for (tier, mut group) in by_tier {
            group.sort_by(|a, b| a.price_ton.cmp(&b.price_ton));
            let Some(buy) = group.first().cloned() else {
                continue;
            };
            if buy.price_ton <= Decimal::ZERO {
                continue;
            }

            let fair = db.fair_value(gift_slug, tier, cfg.fair_value_lookback_days, now)?;

            if let Some(fv) = fair.clone().filter(|fv| fv.confidence >= cfg.min_confidence_for_branch_a) {
                let undervalue_threshold = fv.median_price * Decimal::try_from(cfg.undervalued_ratio).unwrap_or(Decimal::ONE);
                if buy.price_ton <= undervalue_threshold {
                    out.push(Opportunity {
                        gift_slug: gift_slug.to_string(),
                        kind: OpportunityKind::Undervalued,
                        tier,
                        buy_source: buy.marketplace.clone(),
                        sell_source: "fair_value".to_string(),
                        buy_price: buy.price_ton,
                        sell_price: fv.median_price,
                        confidence: fv.confidence,
                    });
                } else if let Some(sell) = best_resale_target(&group, &buy) {
                    let cap = fv.median_price * Decimal::try_from(cfg.arbitrage_cap_ratio).unwrap_or(Decimal::ONE);
                    let sell_price = sell.price_ton.min(cap);
                    if sell_price > buy.price_ton {
                        let net = crate::fees::net_profit(
                            buy.price_ton,
                            sell_price,
                            &buy.marketplace,
                            &sell.marketplace,
                            cfg.marketplace_fee_pct,
                            cfg.gas_fee_ton,
                        );
                        if net >= cfg.min_profit_ton {
                            out.push(Opportunity {
                                gift_slug: gift_slug.to_string(),
                                kind: OpportunityKind::Arbitrage,
                                tier,
                                buy_source: buy.marketplace.clone(),
                                sell_source: sell.marketplace.clone(),
                                buy_price: buy.price_ton,
                                sell_price,
                                confidence: fv.confidence,
                            });
                        }
                    }
                }
            } else if let Some(sell) = best_resale_target(&group, &buy) {
                let ratio = to_f64(sell.price_ton) / to_f64(buy.price_ton).max(f64::EPSILON);
                if ratio <= cfg.cold_start_reject_ratio {
                    let net = crate::fees::net_profit(
                        buy.price_ton,
                        sell.price_ton,
                        &buy.marketplace,
                        &sell.marketplace,
                        cfg.marketplace_fee_pct,
                        cfg.gas_fee_ton,
                    );
                    if net >= cfg.min_profit_ton {
                        out.push(Opportunity {
                            gift_slug: gift_slug.to_string(),
                            kind: OpportunityKind::ArbitrageUnconfirmed,
                            tier,
                            buy_source: buy.marketplace.clone(),
                            sell_source: sell.marketplace.clone(),
                            buy_price: buy.price_ton,
                            sell_price: sell.price_ton,
                            confidence: fair.map(|f| f.confidence).unwrap_or(0.0),
                        });
                    }
                }
            }
        }

        Ok(out)
    }

    /// Rare-at-floor sub-detector: flags rare/ultra-rare listings priced
    /// close to the common floor, with a 4-hour dedup window per address.
    /// `min_discount` is caller-supplied so the same logic can run at the
    /// alerting threshold or the (lower) digest threshold without
    /// double-gating.
    pub fn rare_at_floor(&self, db: &Db, cfg: &Config, now: DateTime<Utc>, gift_slug: &str, min_discount: f64) -> anyhow::Result<Vec<Opportunity>> {
        let Some(common_floor) = db.common_floor(gift_slug)? else {
            return Ok(vec![]);
        };

        let listings = db.active_listings_for_slug(gift_slug)?;
        let mut out = Vec::new();

        for listing in listings.iter().filter(|l| matches!(l.rarity_tier, RarityTier::Rare | RarityTier::UltraRare)) {
            if self.recently_alerted(&listing.nft_address, cfg.rare_floor_dedup) {
                continue;
            }

            let fv = db.fair_value(gift_slug, listing.rarity_tier, 30, now)?;
            let expected = match fv.filter(|f| f.sales_count >= cfg.rare_floor_min_sales_for_confidence) {
                Some(f) => f.median_price,
                None => common_floor * default_premium(listing.rarity_tier),
            };

            if expected <= Decimal::ZERO {
                continue;
            }
            let discount = (expected - listing.price_ton) / expected;
            let discount = to_f64(discount);
            if discount >= min_discount {
                out.push(Opportunity {
                    gift_slug: gift_slug.to_string(),
                    kind: OpportunityKind::RareAtFloor,
                    tier: listing.rarity_tier,
                    buy_source: listing.marketplace.clone(),
                    sell_source: "expected_value".to_string(),
                    buy_price: listing.price_ton,
                    sell_price: expected,
                    confidence: discount.min(1.0),
                });
                self.mark_alerted(&listing.nft_address);
            }
        }

        Ok(out)
    }

    fn recently_alerted(&self, addr: &str, window: Duration) -> bool {
        self.rare_alerted
            .lock()
            .get(addr)
            .map(|t| t.elapsed() < window)
            .unwrap_or(false)
    }

    fn mark_alerted(&self, addr: &str) {
        self.rare_alerted.lock().insert(addr.to_string(), Instant::now());
    }
}

impl Default for OpportunityDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The highest-priced listing on a *different* marketplace from `buy`,
/// used as the resale target for arbitrage opportunities.
fn best_resale_target<'a>(sorted_listings: &'a [Listing], buy: &Listing) -> Option<&'a Listing> {
    sorted_listings
        .iter()
        .filter(|l| l.marketplace != buy.marketplace && l.nft_address != buy.nft_address)
        .max_by(|a, b| a.price_ton.cmp(&b.price_ton))
}

fn to_f64(d: Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}
