//! Stats & digest (§4.J) — per-collection aggregates. Grounded in the
//! reference scanner's `MarketStatsService`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::db::Db;
use crate::models::RarityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTrend {
    Rising,
    Falling,
    Stable,
    /// Fewer than six floor-price samples, or the oldest sample is zero.
    Unknown,
}

/// Per-rarity-tier slice of a collection's stats.
#[derive(Debug, Clone)]
pub struct RarityTierStats {
    pub tier: RarityTier,
    pub active_listings: usize,
    pub floor_price: Option<Decimal>,
    pub median_sale_price_30d: Option<Decimal>,
    pub sales_30d: i64,
    /// `floor_price / common_floor`, `None` if either side is unavailable.
    pub premium_vs_common: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GiftStats {
    pub gift_slug: String,
    pub active_listings: usize,
    pub floor_price: Option<Decimal>,
    pub avg_listing_price: Option<Decimal>,
    pub sales_7d: usize,
    pub sales_30d: usize,
    pub avg_sale_price_7d: Option<Decimal>,
    pub median_sale_price_7d: Option<Decimal>,
    pub last_sale_days_ago: Option<i64>,
    pub liquidity_score: f64,
    pub trend: PriceTrend,
    pub days_of_inventory: Option<f64>,
    pub rarity_breakdown: HashMap<RarityTier, RarityTierStats>,
}

/// Sales-per-day over the last week divided by active inventory, capped at
/// 1.0. Zero active listings is treated as a denominator of 1.
fn liquidity_score(sales_last_7d: usize, active_listings: usize) -> f64 {
    let active = active_listings.max(1) as f64;
    (sales_last_7d as f64 / active).min(1.0)
}

/// Compares the median of the oldest three floor-price samples against
/// the median of the newest three; a >5% move either way is a trend,
/// fewer than six samples (or a zero base) is `Unknown`. Mirrors the
/// reference scanner's `_compute_price_trend`.
fn price_trend(series: &[Decimal]) -> PriceTrend {
    if series.len() < 6 {
        return PriceTrend::Unknown;
    }
    let oldest = median(&series[..3]);
    let newest = median(&series[series.len() - 3..]);
    if oldest == Decimal::ZERO {
        return PriceTrend::Unknown;
    }
    let change = (newest - oldest) / oldest;
    if change > Decimal::new(5, 2) {
        PriceTrend::Rising
    } else if change < Decimal::new(-5, 2) {
        PriceTrend::Falling
    } else {
        PriceTrend::Stable
    }
}

fn median(values: &[Decimal]) -> Decimal {
    let mut sorted = values.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::new(2, 0)
    }
}

fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<Decimal>() / Decimal::from(values.len() as i64))
}

const BREAKDOWN_TIERS: [RarityTier; 4] =
    [RarityTier::UltraRare, RarityTier::Rare, RarityTier::Uncommon, RarityTier::Common];

pub fn collection_stats(db: &Db, gift_slug: &str, now: DateTime<Utc>) -> anyhow::Result<GiftStats> {
    let listings = db.active_listings_for_slug(gift_slug)?;
    let floor_price = listings.first().map(|l| l.price_ton);
    let avg_listing_price = mean(&listings.iter().map(|l| l.price_ton).collect::<Vec<_>>());

    let sales_30d = db.sales_since(gift_slug, now - chrono::Duration::days(30))?;
    let cutoff_7d = now - chrono::Duration::days(7);
    let prices_7d: Vec<Decimal> = sales_30d.iter().filter(|s| s.detected_at >= cutoff_7d).map(|s| s.sale_price_ton).collect();

    let liquidity = liquidity_score(prices_7d.len(), listings.len());

    let series = db.floor_price_series(gift_slug, 60)?;
    let trend = price_trend(&series);

    let days_of_inventory = if prices_7d.is_empty() {
        None
    } else {
        Some(listings.len() as f64 / (prices_7d.len() as f64 / 7.0).max(f64::EPSILON))
    };

    let last_sale_days_ago = db.last_sale_at(gift_slug)?.map(|t| (now - t).num_days());

    let mut active_by_tier: HashMap<RarityTier, Vec<Decimal>> = HashMap::new();
    for l in &listings {
        active_by_tier.entry(l.rarity_tier).or_default().push(l.price_ton);
    }
    let common_floor = active_by_tier.get(&RarityTier::Common).and_then(|v| v.iter().min().copied());

    let mut rarity_breakdown = HashMap::new();
    for tier in BREAKDOWN_TIERS {
        let tier_active = active_by_tier.get(&tier);
        let tier_floor = tier_active.and_then(|v| v.iter().min().copied());
        let tier_fv = db.fair_value(gift_slug, tier, 30, now)?;
        let premium_vs_common = match (tier_floor, common_floor) {
            (Some(f), Some(c)) if c > Decimal::ZERO => {
                use std::str::FromStr;
                f64::from_str(&(f / c).to_string()).ok()
            }
            _ => None,
        };
        rarity_breakdown.insert(
            tier,
            RarityTierStats {
                tier,
                active_listings: tier_active.map(|v| v.len()).unwrap_or(0),
                floor_price: tier_floor,
                median_sale_price_30d: tier_fv.as_ref().map(|fv| fv.median_price),
                sales_30d: tier_fv.map(|fv| fv.sales_count).unwrap_or(0),
                premium_vs_common,
            },
        );
    }

    Ok(GiftStats {
        gift_slug: gift_slug.to_string(),
        active_listings: listings.len(),
        floor_price,
        avg_listing_price,
        sales_7d: prices_7d.len(),
        sales_30d: sales_30d.len(),
        avg_sale_price_7d: mean(&prices_7d),
        median_sale_price_7d: if prices_7d.is_empty() { None } else { Some(median(&prices_7d)) },
        last_sale_days_ago,
        liquidity_score: liquidity,
        trend,
        days_of_inventory,
        rarity_breakdown,
    })
}

pub fn all_collection_stats(db: &Db, now: DateTime<Utc>) -> anyhow::Result<Vec<GiftStats>> {
    db.distinct_slugs()?
        .into_iter()
        .map(|slug| collection_stats(db, &slug, now))
        .collect()
}

/// Rarity premium: median sale price of a tier divided by the median
/// sale price of `common` for the same slug, over the lookback window.
pub fn rarity_premium(db: &Db, gift_slug: &str, tier: RarityTier, lookback_days: i64, now: DateTime<Utc>) -> anyhow::Result<Option<f64>> {
    use std::str::FromStr;
    let tier_fv = db.fair_value(gift_slug, tier, lookback_days, now)?;
    let common_fv = db.fair_value(gift_slug, RarityTier::Common, lookback_days, now)?;
    let premium = match (tier_fv, common_fv) {
        (Some(t), Some(c)) if c.median_price > Decimal::ZERO => {
            let ratio = t.median_price / c.median_price;
            f64::from_str(&ratio.to_string()).ok()
        }
        _ => None,
    };
    Ok(premium)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_caps_at_one() {
        assert_eq!(liquidity_score(1000, 10), 1.0);
    }

    #[test]
    fn liquidity_zero_for_no_sales() {
        assert_eq!(liquidity_score(0, 10), 0.0);
    }

    #[test]
    fn liquidity_uses_active_count_not_fixed_divisor() {
        // 5 sales over 5 active listings should saturate at 1.0, not 5/35.
        assert_eq!(liquidity_score(5, 5), 1.0);
        // 2 sales over 10 active listings is 0.2.
        assert_eq!(liquidity_score(2, 10), 0.2);
    }

    #[test]
    fn liquidity_treats_zero_active_as_one() {
        assert_eq!(liquidity_score(3, 0), 1.0);
    }

    #[test]
    fn trend_needs_six_samples() {
        let series = vec![Decimal::new(10, 0); 3];
        assert_eq!(price_trend(&series), PriceTrend::Unknown);
    }

    #[test]
    fn trend_detects_rising() {
        let series: Vec<Decimal> = vec![10, 10, 10, 13, 13, 13].into_iter().map(|n| Decimal::new(n, 0)).collect();
        assert_eq!(price_trend(&series), PriceTrend::Rising);
    }

    #[test]
    fn trend_detects_falling() {
        let series: Vec<Decimal> = vec![10, 10, 10, 7, 7, 7].into_iter().map(|n| Decimal::new(n, 0)).collect();
        assert_eq!(price_trend(&series), PriceTrend::Falling);
    }

    #[test]
    fn trend_unknown_when_base_is_zero() {
        let series: Vec<Decimal> = vec![0, 0, 0, 1, 1, 1].into_iter().map(|n| Decimal::new(n, 0)).collect();
        assert_eq!(price_trend(&series), PriceTrend::Unknown);
    }
}
