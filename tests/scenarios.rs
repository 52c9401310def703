//! End-to-end scenarios over an in-memory database, exercising the
//! scan → diff → analyze pipeline without any real marketplace adapter.

use chrono::Utc;
use giftscan_core::config::{Config, SourceLimits};
use giftscan_core::db::Db;
use giftscan_core::detector::{OpportunityDetector, OpportunityKind};
use giftscan_core::models::{Currency, PriceObservation};
use giftscan_core::reconciler::reconcile;
use rust_decimal::Decimal;
use std::time::Duration;

fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        scan_interval: Duration::from_secs(30),
        digest_interval: Duration::from_secs(6 * 3600),
        tonapi_key: None,
        portals_auth_token: None,
        portals_secret: None,
        undervalued_ratio: 0.7,
        arbitrage_cap_ratio: 1.1,
        cold_start_reject_ratio: 2.0,
        min_confidence_for_branch_a: 0.2,
        rare_floor_min_discount: 0.30,
        rare_floor_min_sales_for_confidence: 3,
        rare_floor_dedup: Duration::from_secs(4 * 3600),
        alert_min_batch_size: 3,
        alert_min_spread_ton: Decimal::new(10, 0),
        digest_min_discount: 0.15,
        digest_top_n: 8,
        fair_value_lookback_days: 30,
        marketplace_fee_pct: Decimal::new(50, 1),
        gas_fee_ton: Decimal::new(1, 1),
        min_profit_ton: Decimal::ZERO,
        arbitrage_threshold_pct: 5.0,
        default_limits: SourceLimits::default(),
    }
}

fn obs(slug: &str, addr: &str, mkt: &str, price: i64, serial: u32) -> PriceObservation {
    PriceObservation {
        gift_slug: slug.to_string(),
        nft_address: Some(addr.to_string()),
        serial_number: Some(serial),
        attributes: None,
        price: Decimal::new(price, 0),
        currency: Currency::Ton,
        marketplace: mkt.to_string(),
    }
}

#[test]
fn scenario_new_listing_then_sale() {
    let db = Db::open_in_memory().unwrap();
    let now = Utc::now();

    reconcile(&db, now, &[obs("plush-pepe", "a", "Fragment", 10, 200)]).unwrap();
    assert_eq!(db.active_listings().unwrap().len(), 1);

    let outcome = reconcile(&db, now, &[]).unwrap();
    assert_eq!(outcome.sales.len(), 1);
    assert_eq!(outcome.sales[0].sale_price_ton, Decimal::new(10, 0));
    assert!(db.active_listings().unwrap().is_empty());
}

#[test]
fn scenario_cold_start_arbitrage_then_confident_once_sales_accumulate() {
    let db = Db::open_in_memory().unwrap();
    let cfg = test_config();
    let now = Utc::now();
    let detector = OpportunityDetector::new();

    reconcile(
        &db,
        now,
        &[obs("toy-bear", "a", "Fragment", 5, 150), obs("toy-bear", "b", "Portals", 9, 151)],
    )
    .unwrap();

    let opps = detector.detect_slug(&db, &cfg, now, "toy-bear").unwrap();
    assert_eq!(opps.len(), 1);
    assert_eq!(opps[0].kind, OpportunityKind::ArbitrageUnconfirmed);
}

#[test]
fn scenario_undervalued_once_fair_value_is_confident() {
    let db = Db::open_in_memory().unwrap();
    let cfg = test_config();
    let now = Utc::now();
    let detector = OpportunityDetector::new();

    // Seed 10 historical sales at price 20 so confidence reaches 1.0.
    for i in 0..10 {
        reconcile(&db, now, &[obs("jester-hat", &format!("s{i}"), "Fragment", 20, 150)]).unwrap();
        reconcile(&db, now, &[]).unwrap();
    }

    reconcile(&db, now, &[obs("jester-hat", "cheap", "Fragment", 10, 160)]).unwrap();

    let opps = detector.detect_slug(&db, &cfg, now, "jester-hat").unwrap();
    assert_eq!(opps.len(), 1);
    assert_eq!(opps[0].kind, OpportunityKind::Undervalued);
}

#[test]
fn scenario_rare_at_floor_flags_underpriced_rare_item() {
    let db = Db::open_in_memory().unwrap();
    let cfg = test_config();
    let now = Utc::now();
    let detector = OpportunityDetector::new();

    // Common floor established at 10 TON.
    reconcile(&db, now, &[obs("durovs-cap", "common-1", "Fragment", 10, 9001)]).unwrap();

    // A rare item (serial 500) listed at 12 TON — expected ~= 10 * 2.5 = 25,
    // so 12 is a >50% discount.
    reconcile(&db, now, &[obs("durovs-cap", "common-1", "Fragment", 10, 9001), obs("durovs-cap", "rare-1", "Portals", 12, 500)]).unwrap();

    let flags = detector.rare_at_floor(&db, &cfg, now, "durovs-cap", cfg.rare_floor_min_discount).unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].buy_price, Decimal::new(12, 0));
}

#[test]
fn scenario_rare_at_floor_dedup_suppresses_repeat_alert() {
    let db = Db::open_in_memory().unwrap();
    let cfg = test_config();
    let now = Utc::now();
    let detector = OpportunityDetector::new();

    reconcile(&db, now, &[obs("durovs-cap", "common-1", "Fragment", 10, 9001), obs("durovs-cap", "rare-1", "Portals", 12, 500)]).unwrap();

    let first = detector.rare_at_floor(&db, &cfg, now, "durovs-cap", cfg.rare_floor_min_discount).unwrap();
    assert_eq!(first.len(), 1);

    let second = detector.rare_at_floor(&db, &cfg, now, "durovs-cap", cfg.rare_floor_min_discount).unwrap();
    assert!(second.is_empty(), "same listing should be deduped within the window");
}
