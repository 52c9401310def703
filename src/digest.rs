//! Periodic market digest: four sections (top collections by liquidity,
//! rarity premium table, rare-at-floor now, 24h rare sales). Grounded in
//! the reference scanner's `MarketDigestService`.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db::Db;
use crate::detector::OpportunityDetector;
use crate::models::RarityTier;
use crate::stats::{all_collection_stats, rarity_premium, GiftStats};

pub struct DigestBuilder<'a> {
    db: &'a Db,
    cfg: &'a Config,
    detector: &'a OpportunityDetector,
}

impl<'a> DigestBuilder<'a> {
    pub fn new(db: &'a Db, cfg: &'a Config, detector: &'a OpportunityDetector) -> Self {
        Self { db, cfg, detector }
    }

    pub fn build(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut stats = all_collection_stats(self.db, now)?;
        stats.sort_by(|a, b| b.liquidity_score.partial_cmp(&a.liquidity_score).unwrap());

        let mut out = String::new();
        out.push_str(&self.top_collections_section(&stats));
        out.push_str(&self.rarity_premium_section(&stats, now)?);
        out.push_str(&self.rare_at_floor_section(&stats, now)?);
        out.push_str(&self.rare_sales_section(&stats, now)?);
        Ok(out)
    }

    fn top_collections_section(&self, stats: &[GiftStats]) -> String {
        let mut out = String::from("== Top collections by liquidity ==\n");
        for s in stats.iter().take(self.cfg.digest_top_n) {
            out.push_str(&format!(
                "  {:<20} {}\n",
                s.gift_slug,
                liquidity_bar(s.liquidity_score)
            ));
        }
        out.push('\n');
        out
    }

    fn rarity_premium_section(&self, stats: &[GiftStats], now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut out = String::from("== Rarity premiums ==\n");
        for s in stats.iter().take(self.cfg.digest_top_n) {
            for tier in [RarityTier::UltraRare, RarityTier::Rare, RarityTier::Uncommon] {
                if let Some(premium) = rarity_premium(self.db, &s.gift_slug, tier, self.cfg.fair_value_lookback_days, now)? {
                    out.push_str(&format!("  {} {}: {:.1}x\n", s.gift_slug, tier.as_str(), premium));
                }
            }
        }
        out.push('\n');
        Ok(out)
    }

    fn rare_at_floor_section(&self, stats: &[GiftStats], now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut out = String::from("== Rare-at-floor now ==\n");
        for s in stats {
            for opp in self.detector.rare_at_floor(self.db, self.cfg, now, &s.gift_slug, self.cfg.digest_min_discount)? {
                out.push_str(&format!(
                    "  {} [{}] listed {} vs expected {}\n",
                    opp.gift_slug,
                    opp.tier.as_str(),
                    opp.buy_price,
                    opp.sell_price
                ));
            }
        }
        out.push('\n');
        Ok(out)
    }

    fn rare_sales_section(&self, stats: &[GiftStats], now: DateTime<Utc>) -> anyhow::Result<String> {
        let mut out = String::from("== Rare sales (24h) ==\n");
        let since = now - chrono::Duration::hours(24);
        for s in stats {
            for sale in self.db.sales_since(&s.gift_slug, since)? {
                if matches!(sale.rarity_tier, RarityTier::Rare | RarityTier::UltraRare) {
                    out.push_str(&format!(
                        "  {} [{}] sold for {} on {}\n",
                        sale.gift_slug,
                        sale.rarity_tier.as_str(),
                        sale.sale_price_ton,
                        sale.marketplace
                    ));
                }
            }
        }
        Ok(out)
    }
}

fn liquidity_bar(score: f64) -> String {
    let filled = (score * 10.0).round() as usize;
    format!("[{}{}] {:.2}", "#".repeat(filled), "-".repeat(10 - filled), score)
}

/// Gates digest sends to once per `digest_interval`.
pub fn should_send(last_sent: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: std::time::Duration) -> bool {
    match last_sent {
        None => true,
        Some(last) => now - last >= chrono::Duration::from_std(interval).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_bar_renders_full_and_empty() {
        assert!(liquidity_bar(1.0).starts_with("[##########]"));
        assert!(liquidity_bar(0.0).starts_with("[----------]"));
    }

    #[test]
    fn should_send_when_never_sent() {
        assert!(should_send(None, Utc::now(), std::time::Duration::from_secs(60)));
    }

    #[test]
    fn should_not_send_before_interval_elapses() {
        let now = Utc::now();
        assert!(!should_send(Some(now), now, std::time::Duration::from_secs(3600)));
    }
}
