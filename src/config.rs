//! Process-wide configuration, loaded once at startup.

use anyhow::{Context, Result};
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Per-source rate limit and retry policy.
#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub requests_per_window: u32,
    pub window: Duration,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_cap_ms: u64,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            requests_per_window: 5,
            window: Duration::from_secs(1),
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_multiplier: 2.0,
            backoff_cap_ms: 30_000,
        }
    }
}

/// Top-level daemon configuration. Loaded once in `main` via
/// `Config::from_env()` and threaded explicitly through `AppState` — no
/// global singleton reads it afterward.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub scan_interval: Duration,
    pub digest_interval: Duration,

    pub tonapi_key: Option<String>,
    pub portals_auth_token: Option<String>,
    pub portals_secret: Option<String>,

    pub undervalued_ratio: f64,
    pub arbitrage_cap_ratio: f64,
    pub cold_start_reject_ratio: f64,
    pub min_confidence_for_branch_a: f64,

    pub rare_floor_min_discount: f64,
    pub rare_floor_min_sales_for_confidence: i64,
    pub rare_floor_dedup: Duration,

    pub alert_min_batch_size: usize,
    pub alert_min_spread_ton: rust_decimal::Decimal,

    pub digest_min_discount: f64,
    pub digest_top_n: usize,

    pub fair_value_lookback_days: i64,

    /// Default marketplace fee percent (fallback for sources not in the
    /// fee table) and flat per-leg gas estimate, used by the net-profit
    /// classifier that gates arbitrage alerts.
    pub marketplace_fee_pct: rust_decimal::Decimal,
    pub gas_fee_ton: rust_decimal::Decimal,
    /// Minimum net profit (after fees) required to emit an arbitrage alert.
    pub min_profit_ton: rust_decimal::Decimal,
    /// Spread percent above which the external read API's `arbitrage_signal`
    /// flag is set. Not consumed by the core scan pipeline itself (§6).
    pub arbitrage_threshold_pct: f64,

    pub default_limits: SourceLimits,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path = env_or("DATABASE_PATH", "./giftscan.db");

        let scan_interval = Duration::from_secs(parse_env("SCAN_INTERVAL_SECS", 30u64)?);
        let digest_interval = Duration::from_secs(parse_env("DIGEST_INTERVAL_HOURS", 6u64)? * 3600);

        let tonapi_key = std::env::var("TONAPI_KEY").ok();
        let portals_auth_token = std::env::var("PORTALS_AUTH_TOKEN").ok();
        let portals_secret = std::env::var("PORTALS_AUTH_SECRET").ok();

        let undervalued_ratio = parse_env("UNDERVALUED_RATIO", 0.7f64)?;
        let arbitrage_cap_ratio = parse_env("ARBITRAGE_CAP_RATIO", 1.1f64)?;
        let cold_start_reject_ratio = parse_env("COLD_START_REJECT_RATIO", 2.0f64)?;
        let min_confidence_for_branch_a = parse_env("MIN_CONFIDENCE_FOR_BRANCH_A", 0.2f64)?;

        let rare_floor_min_discount = parse_env("RARE_FLOOR_MIN_DISCOUNT", 0.30f64)?;
        let rare_floor_min_sales_for_confidence =
            parse_env("RARE_FLOOR_MIN_SALES_FOR_CONFIDENCE", 3i64)?;
        let rare_floor_dedup = Duration::from_secs(parse_env("RARE_FLOOR_DEDUP_HOURS", 4u64)? * 3600);

        let alert_min_batch_size = parse_env("ALERT_MIN_BATCH_SIZE", 3usize)?;
        let alert_min_spread_ton: f64 = parse_env("ALERT_MIN_SPREAD_TON", 10.0f64)?;
        let alert_min_spread_ton = rust_decimal::Decimal::try_from(alert_min_spread_ton)
            .context("ALERT_MIN_SPREAD_TON must be a finite decimal")?;

        let digest_min_discount = parse_env("DIGEST_MIN_DISCOUNT", 0.15f64)?;
        let digest_top_n = parse_env("DIGEST_TOP_N", 8usize)?;

        let fair_value_lookback_days = parse_env("FAIR_VALUE_LOOKBACK_DAYS", 30i64)?;

        let marketplace_fee_pct: f64 = parse_env("MARKETPLACE_FEE_PCT", 5.0f64)?;
        let marketplace_fee_pct = rust_decimal::Decimal::try_from(marketplace_fee_pct)
            .context("MARKETPLACE_FEE_PCT must be a finite decimal")?;
        let gas_fee_ton: f64 = parse_env("GAS_FEE_TON", 0.1f64)?;
        let gas_fee_ton =
            rust_decimal::Decimal::try_from(gas_fee_ton).context("GAS_FEE_TON must be a finite decimal")?;
        let min_profit_ton: f64 = parse_env("MIN_PROFIT_TON", 5.0f64)?;
        let min_profit_ton =
            rust_decimal::Decimal::try_from(min_profit_ton).context("MIN_PROFIT_TON must be a finite decimal")?;
        let arbitrage_threshold_pct = parse_env("ARBITRAGE_THRESHOLD_PCT", 5.0f64)?;

        Ok(Self {
            database_path,
            scan_interval,
            digest_interval,
            tonapi_key,
            portals_auth_token,
            portals_secret,
            undervalued_ratio,
            arbitrage_cap_ratio,
            cold_start_reject_ratio,
            min_confidence_for_branch_a,
            rare_floor_min_discount,
            rare_floor_min_sales_for_confidence,
            rare_floor_dedup,
            alert_min_batch_size,
            alert_min_spread_ton,
            digest_min_discount,
            digest_top_n,
            fair_value_lookback_days,
            marketplace_fee_pct,
            gas_fee_ton,
            min_profit_ton,
            arbitrage_threshold_pct,
            default_limits: SourceLimits::default(),
        })
    }
}
