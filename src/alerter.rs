//! Alerter (§4.I): dedups opportunities already surfaced, batches them,
//! and hands a formatted message to a `MessageSink`. Grounded in the
//! reference scanner's `ArbitrageNotifier` — the batch variant adopted
//! over the single-message-per-deal variant (see DESIGN.md).

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::config::Config;
use crate::detector::{Opportunity, OpportunityKind};
use crate::sink::MessageSink;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DealKey {
    gift_slug: String,
    buy_source: String,
    sell_source: String,
}

pub struct Alerter<'a> {
    cfg: &'a Config,
    sink: &'a dyn MessageSink,
    /// Last-fired (buy_price, sell_price) per deal key — an opportunity
    /// at an unchanged price pair is not re-alerted.
    fired: Mutex<HashMap<DealKey, (Decimal, Decimal)>>,
}

impl<'a> Alerter<'a> {
    pub fn new(cfg: &'a Config, sink: &'a dyn MessageSink) -> Self {
        Self { cfg, sink, fired: Mutex::new(HashMap::new()) }
    }

    /// Process one scan's worth of opportunities: filter out noise and
    /// already-fired identical deals, then either send a batch summary
    /// (≥ `alert_min_batch_size` new deals) or just log them.
    pub async fn process(&self, opportunities: &[Opportunity]) -> anyhow::Result<()> {
        let noteworthy: Vec<&Opportunity> = opportunities.iter().filter(|o| self.is_noteworthy(o)).collect();

        let mut new_deals = Vec::new();
        {
            let mut fired = self.fired.lock();
            for opp in noteworthy {
                let key = DealKey {
                    gift_slug: opp.gift_slug.clone(),
                    buy_source: opp.buy_source.clone(),
                    sell_source: opp.sell_source.clone(),
                };
                let price_pair = (opp.buy_price, opp.sell_price);
                if fired.get(&key) == Some(&price_pair) {
                    continue;
                }
                fired.insert(key, price_pair);
                new_deals.push(opp.clone());
            }
        }

        if new_deals.is_empty() {
            return Ok(());
        }

        new_deals.sort_by(|a, b| {
            let rank_a = rank(a.kind);
            let rank_b = rank(b.kind);
            rank_a.cmp(&rank_b).then_with(|| spread(b).cmp(&spread(a)))
        });

        if new_deals.len() < self.cfg.alert_min_batch_size {
            for deal in &new_deals {
                info!(
                    slug = deal.gift_slug,
                    buy = %deal.buy_price,
                    sell = %deal.sell_price,
                    kind = ?deal.kind,
                    "opportunity found (below batch threshold, logged only)"
                );
            }
            return Ok(());
        }

        let message = format_summary_table(&new_deals);
        self.sink.send(&message).await
    }

    fn is_noteworthy(&self, opp: &Opportunity) -> bool {
        match opp.kind {
            OpportunityKind::Undervalued | OpportunityKind::RareAtFloor => true,
            OpportunityKind::Arbitrage | OpportunityKind::ArbitrageUnconfirmed => {
                spread(opp) >= self.cfg.alert_min_spread_ton
            }
        }
    }
}

fn spread(opp: &Opportunity) -> Decimal {
    opp.sell_price - opp.buy_price
}

fn rank(kind: OpportunityKind) -> u8 {
    match kind {
        OpportunityKind::Undervalued => 0,
        OpportunityKind::RareAtFloor => 1,
        OpportunityKind::Arbitrage => 2,
        OpportunityKind::ArbitrageUnconfirmed => 3,
    }
}

fn format_summary_table(deals: &[Opportunity]) -> String {
    let mut out = format!("{} new opportunities found:\n", deals.len());
    for d in deals {
        out.push_str(&format!(
            "  [{:?}] {} — buy {} @ {} -> sell {} @ {} (spread {})\n",
            d.kind,
            d.gift_slug,
            d.buy_price,
            d.buy_source,
            d.sell_price,
            d.sell_source,
            spread(d)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RarityTier;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn cfg() -> Config {
        Config {
            database_path: ":memory:".to_string(),
            scan_interval: std::time::Duration::from_secs(30),
            digest_interval: std::time::Duration::from_secs(3600),
            tonapi_key: None,
            portals_auth_token: None,
            portals_secret: None,
            undervalued_ratio: 0.7,
            arbitrage_cap_ratio: 1.1,
            cold_start_reject_ratio: 2.0,
            min_confidence_for_branch_a: 0.2,
            rare_floor_min_discount: 0.3,
            rare_floor_min_sales_for_confidence: 3,
            rare_floor_dedup: std::time::Duration::from_secs(4 * 3600),
            alert_min_batch_size: 3,
            alert_min_spread_ton: Decimal::new(10, 0),
            digest_min_discount: 0.15,
            digest_top_n: 8,
            fair_value_lookback_days: 30,
            marketplace_fee_pct: rust_decimal::Decimal::new(50, 1),
            gas_fee_ton: rust_decimal::Decimal::new(1, 1),
            min_profit_ton: rust_decimal::Decimal::ZERO,
            arbitrage_threshold_pct: 5.0,
            default_limits: crate::config::SourceLimits::default(),
        }
    }

    fn opp(slug: &str, kind: OpportunityKind, buy: i64, sell: i64) -> Opportunity {
        Opportunity {
            gift_slug: slug.to_string(),
            kind,
            tier: RarityTier::Rare,
            buy_source: "Fragment".to_string(),
            sell_source: "Portals".to_string(),
            buy_price: Decimal::new(buy, 0),
            sell_price: Decimal::new(sell, 0),
            confidence: 0.5,
        }
    }

    #[tokio::test]
    async fn below_batch_threshold_logs_only() {
        let c = cfg();
        let sink = RecordingSink { sent: StdMutex::new(vec![]) };
        let alerter = Alerter::new(&c, &sink);
        let deals = vec![opp("a", OpportunityKind::Undervalued, 1, 20)];
        alerter.process(&deals).await.unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn at_batch_threshold_sends_summary() {
        let c = cfg();
        let sink = RecordingSink { sent: StdMutex::new(vec![]) };
        let alerter = Alerter::new(&c, &sink);
        let deals = vec![
            opp("a", OpportunityKind::Undervalued, 1, 20),
            opp("b", OpportunityKind::Undervalued, 1, 20),
            opp("c", OpportunityKind::Undervalued, 1, 20),
        ];
        alerter.process(&deals).await.unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_price_pair_is_not_refired() {
        let c = cfg();
        let sink = RecordingSink { sent: StdMutex::new(vec![]) };
        let alerter = Alerter::new(&c, &sink);
        let deals = vec![
            opp("a", OpportunityKind::Undervalued, 1, 20),
            opp("b", OpportunityKind::Undervalued, 1, 20),
            opp("c", OpportunityKind::Undervalued, 1, 20),
        ];
        alerter.process(&deals).await.unwrap();
        alerter.process(&deals).await.unwrap();
        // second call: all three are unchanged duplicates, nothing new to send
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn low_spread_arbitrage_is_not_noteworthy() {
        let c = cfg();
        let sink = RecordingSink { sent: StdMutex::new(vec![]) };
        let alerter = Alerter::new(&c, &sink);
        let deals = vec![opp("a", OpportunityKind::Arbitrage, 10, 11)];
        alerter.process(&deals).await.unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
