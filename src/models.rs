//! Core domain types shared across the scan → diff → analyze pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Currency a price was observed in. TON is the only basis valuation math
/// operates on; amounts in other currencies are stored as observed and
/// never silently converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Ton,
    Usdt,
    Stars,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ton => "TON",
            Currency::Usdt => "USDT",
            Currency::Stars => "STARS",
            Currency::Usd => "USD",
        }
    }
}

/// Freeform attribute bag attached to a gift. Recognized keys
/// (`Backdrop`, `Model`, `Symbol`) feed rarity/valuation logic; anything
/// else is stored but never interpreted.
pub type Attributes = HashMap<String, String>;

/// Rarity tier, ordered loosest to tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarityTier {
    Unknown,
    Common,
    Uncommon,
    Rare,
    UltraRare,
}

impl RarityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RarityTier::Unknown => "unknown",
            RarityTier::Common => "common",
            RarityTier::Uncommon => "uncommon",
            RarityTier::Rare => "rare",
            RarityTier::UltraRare => "ultra_rare",
        }
    }
}

const REPDIGIT_SERIALS: &[&str] = &["777", "420", "1234", "5555", "6969", "8888"];

/// Determine rarity tier from serial number and attribute bag.
///
/// Mirrors the reference scanner's tier rules exactly: serial < 100, or a
/// black backdrop, is ultra-rare; serial < 1000, or a recognized "lucky"
/// serial, or a repeated-digit serial, is rare; serial < 5000 is
/// uncommon; everything else is common. No serial at all means the tier
/// cannot be determined.
pub fn rarity_tier(serial: Option<u32>, attributes: Option<&Attributes>) -> RarityTier {
    let Some(serial) = serial else {
        return RarityTier::Unknown;
    };

    if serial < 100 {
        return RarityTier::UltraRare;
    }
    if attributes
        .and_then(|a| a.get("Backdrop"))
        .map(|v| v == "Black")
        .unwrap_or(false)
    {
        return RarityTier::UltraRare;
    }

    if serial < 1000 {
        return RarityTier::Rare;
    }
    let sn = serial.to_string();
    if REPDIGIT_SERIALS.contains(&sn.as_str()) {
        return RarityTier::Rare;
    }
    if sn.chars().collect::<std::collections::HashSet<_>>().len() == 1 {
        return RarityTier::Rare;
    }

    if serial < 5000 {
        return RarityTier::Uncommon;
    }
    RarityTier::Common
}

/// A catalog entry: one gift collection tracked across marketplaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gift {
    pub slug: String,
    pub display_name: String,
}

/// One price observation recorded during a scan tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub gift_slug: String,
    pub nft_address: Option<String>,
    pub serial_number: Option<u32>,
    pub attributes: Option<Attributes>,
    pub price: Decimal,
    pub currency: Currency,
    pub source: String,
    pub scanned_at: DateTime<Utc>,
}

/// An active offer, keyed by the marketplace-native NFT address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub nft_address: String,
    pub gift_slug: String,
    pub serial_number: Option<u32>,
    pub rarity_tier: RarityTier,
    pub price_ton: Decimal,
    pub marketplace: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// An inferred sale: a listing that disappeared between two scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub gift_slug: String,
    pub nft_address: String,
    pub serial_number: Option<u32>,
    pub rarity_tier: RarityTier,
    pub sale_price_ton: Decimal,
    pub marketplace: String,
    pub detected_at: DateTime<Utc>,
}

/// A single marketplace's raw observation of a listing, as returned by an
/// adapter before it becomes a `Snapshot`/`Listing`.
#[derive(Debug, Clone)]
pub struct PriceObservation {
    pub gift_slug: String,
    pub nft_address: Option<String>,
    pub serial_number: Option<u32>,
    pub attributes: Option<Attributes>,
    pub price: Decimal,
    pub currency: Currency,
    pub marketplace: String,
}

/// Fair-value estimate for a (gift, rarity tier) pair, derived from
/// recent sales.
#[derive(Debug, Clone, PartialEq)]
pub struct FairValue {
    pub gift_slug: String,
    pub rarity_tier: RarityTier,
    pub median_price: Decimal,
    pub mean_price: Decimal,
    pub sales_count: i64,
    pub recent_count: i64,
    pub last_sale_days_ago: Option<i64>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_without_serial_is_unknown() {
        assert_eq!(rarity_tier(None, None), RarityTier::Unknown);
    }

    #[test]
    fn tier_below_100_is_ultra_rare() {
        assert_eq!(rarity_tier(Some(42), None), RarityTier::UltraRare);
    }

    #[test]
    fn black_backdrop_is_ultra_rare_regardless_of_serial() {
        let mut attrs = Attributes::new();
        attrs.insert("Backdrop".to_string(), "Black".to_string());
        assert_eq!(rarity_tier(Some(4321), Some(&attrs)), RarityTier::UltraRare);
    }

    #[test]
    fn repdigit_serial_is_rare() {
        assert_eq!(rarity_tier(Some(7777), None), RarityTier::Rare);
    }

    #[test]
    fn known_lucky_serial_is_rare() {
        assert_eq!(rarity_tier(Some(1234), None), RarityTier::Rare);
    }

    #[test]
    fn mid_range_is_uncommon() {
        assert_eq!(rarity_tier(Some(4999), None), RarityTier::Uncommon);
    }

    #[test]
    fn high_serial_is_common() {
        assert_eq!(rarity_tier(Some(9001), None), RarityTier::Common);
    }

    #[test]
    fn tier_is_deterministic() {
        for serial in [5, 99, 100, 999, 1000, 4999, 5000, 50000] {
            assert_eq!(rarity_tier(Some(serial), None), rarity_tier(Some(serial), None));
        }
    }
}
