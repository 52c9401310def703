//! SQLite persistence. One `Db` instance owns the single write connection
//! used by every component (§5 single-writer rule); all SQL lives here so
//! call sites never see a raw statement.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::{Currency, FairValue, Listing, RarityTier, Sale, Snapshot};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS catalog (
    slug         TEXT PRIMARY KEY,
    display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    gift_slug     TEXT NOT NULL,
    nft_address   TEXT,
    serial_number INTEGER,
    attributes    TEXT,
    price         TEXT NOT NULL,
    currency      TEXT NOT NULL,
    source        TEXT NOT NULL,
    scanned_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshot_slug_time ON snapshot(gift_slug, scanned_at);

CREATE TABLE IF NOT EXISTS listing (
    nft_address   TEXT PRIMARY KEY,
    gift_slug     TEXT NOT NULL,
    serial_number INTEGER,
    rarity_tier   TEXT NOT NULL,
    price_ton     TEXT NOT NULL,
    marketplace   TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_seen_at  TEXT NOT NULL,
    sold_at       TEXT
);
CREATE INDEX IF NOT EXISTS idx_listing_slug ON listing(gift_slug);
CREATE INDEX IF NOT EXISTS idx_listing_sold ON listing(sold_at);

CREATE TABLE IF NOT EXISTS sale (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    gift_slug       TEXT NOT NULL,
    nft_address     TEXT NOT NULL,
    serial_number   INTEGER,
    rarity_tier     TEXT NOT NULL,
    sale_price_ton  TEXT NOT NULL,
    marketplace     TEXT NOT NULL,
    detected_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sale_slug_tier_time ON sale(gift_slug, rarity_tier, detected_at);
"#;

/// Result of one reconciliation pass (see `reconciler::reconcile`).
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub sales: Vec<Sale>,
}

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL).context("applying schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(SCHEMA_SQL).context("applying schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn upsert_catalog(&self, slug: &str, display_name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO catalog (slug, display_name) VALUES (?1, ?2)
             ON CONFLICT(slug) DO UPDATE SET display_name = excluded.display_name",
            params![slug, display_name],
        )?;
        Ok(())
    }

    pub fn insert_snapshots(&self, snapshots: &[Snapshot]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO snapshot
                    (gift_slug, nft_address, serial_number, attributes, price, currency, source, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for s in snapshots {
                stmt.execute(params![
                    s.gift_slug,
                    s.nft_address,
                    s.serial_number,
                    s.attributes.as_ref().map(|a| serde_json::to_string(a).unwrap_or_default()),
                    s.price.to_string(),
                    currency_str(s.currency),
                    s.source,
                    s.scanned_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load every listing with `sold_at IS NULL`, keyed by nft_address.
    pub fn active_listings(&self) -> Result<Vec<Listing>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT nft_address, gift_slug, serial_number, rarity_tier, price_ton,
                    marketplace, first_seen_at, last_seen_at
             FROM listing WHERE sold_at IS NULL",
        )?;
        let rows = stmt.query_map([], row_to_listing)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Apply one reconciliation pass inside a single transaction: sold
    /// rows get `sold_at` set and a `sale` row inserted, new rows get
    /// inserted, seen rows get `last_seen_at`/price refreshed.
    pub fn apply_reconciliation(
        &self,
        now: DateTime<Utc>,
        to_sell: &[Listing],
        to_insert: &[Listing],
        to_touch: &[Listing],
    ) -> Result<ReconcileOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut outcome = ReconcileOutcome::default();

        for l in to_sell {
            // Dedup: skip if a sale for this address was already recorded
            // within the last hour (re-run safety, §4.F).
            let cutoff = (now - chrono::Duration::hours(1)).to_rfc3339();
            let already: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM sale WHERE nft_address = ?1 AND detected_at >= ?2 LIMIT 1",
                    params![l.nft_address, cutoff],
                    |r| r.get(0),
                )
                .optional()?;
            if already.is_some() {
                continue;
            }
            if l.price_ton <= Decimal::ZERO {
                tx.execute(
                    "UPDATE listing SET sold_at = ?1 WHERE nft_address = ?2",
                    params![now.to_rfc3339(), l.nft_address],
                )?;
                continue;
            }
            tx.execute(
                "UPDATE listing SET sold_at = ?1 WHERE nft_address = ?2",
                params![now.to_rfc3339(), l.nft_address],
            )?;
            tx.execute(
                "INSERT INTO sale
                    (gift_slug, nft_address, serial_number, rarity_tier, sale_price_ton, marketplace, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    l.gift_slug,
                    l.nft_address,
                    l.serial_number,
                    l.rarity_tier.as_str(),
                    l.price_ton.to_string(),
                    l.marketplace,
                    now.to_rfc3339(),
                ],
            )?;
            outcome.sales.push(Sale {
                gift_slug: l.gift_slug.clone(),
                nft_address: l.nft_address.clone(),
                serial_number: l.serial_number,
                rarity_tier: l.rarity_tier,
                sale_price_ton: l.price_ton,
                marketplace: l.marketplace.clone(),
                detected_at: now,
            });
        }

        for l in to_insert {
            tx.execute(
                "INSERT INTO listing
                    (nft_address, gift_slug, serial_number, rarity_tier, price_ton, marketplace, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(nft_address) DO UPDATE SET
                    price_ton = excluded.price_ton,
                    last_seen_at = excluded.last_seen_at,
                    sold_at = NULL",
                params![
                    l.nft_address,
                    l.gift_slug,
                    l.serial_number,
                    l.rarity_tier.as_str(),
                    l.price_ton.to_string(),
                    l.marketplace,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )?;
            outcome.inserted += 1;
        }

        for l in to_touch {
            tx.execute(
                "UPDATE listing SET last_seen_at = ?1, price_ton = ?2 WHERE nft_address = ?3",
                params![now.to_rfc3339(), l.price_ton.to_string(), l.nft_address],
            )?;
            outcome.updated += 1;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Median/mean sale price, sale counts and recency for a
    /// (gift_slug, rarity_tier) pair over the last `lookback_days` days.
    /// Returns `None` if there are no sales in the window at all.
    pub fn fair_value(
        &self,
        gift_slug: &str,
        tier: RarityTier,
        lookback_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<FairValue>> {
        let conn = self.conn.lock();
        let cutoff = (now - chrono::Duration::days(lookback_days)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT sale_price_ton, detected_at FROM sale
             WHERE gift_slug = ?1 AND rarity_tier = ?2 AND detected_at >= ?3
             ORDER BY detected_at DESC",
        )?;
        let rows: Vec<(Decimal, DateTime<Utc>)> = stmt
            .query_map(params![gift_slug, tier.as_str(), cutoff], |r| {
                let price_raw: String = r.get(0)?;
                let ts_raw: String = r.get(1)?;
                Ok((price_raw, ts_raw))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter_map(|(p, t)| {
                Some((
                    Decimal::from_str(&p).ok()?,
                    DateTime::parse_from_rfc3339(&t).ok()?.with_timezone(&Utc),
                ))
            })
            .collect();

        if rows.is_empty() {
            return Ok(None);
        }

        let mut prices: Vec<Decimal> = rows.iter().map(|(p, _)| *p).collect();
        prices.sort();
        let median_price = median(&prices);
        let mean_price = prices.iter().sum::<Decimal>() / Decimal::from(prices.len() as i64);

        let recent_cutoff = now - chrono::Duration::days(7);
        let recent_count = rows.iter().filter(|(_, t)| *t >= recent_cutoff).count() as i64;
        let days_since_last = rows.iter().map(|(_, t)| *t).max().map(|t| (now - t).num_days());

        let confidence = crate::valuation::confidence(rows.len() as i64, recent_count, days_since_last);

        Ok(Some(FairValue {
            gift_slug: gift_slug.to_string(),
            rarity_tier: tier,
            median_price,
            mean_price,
            sales_count: rows.len() as i64,
            recent_count,
            last_sale_days_ago: days_since_last,
            confidence,
        }))
    }

    /// Common floor for a gift slug: the minimum active common-tier
    /// listing price.
    pub fn common_floor(&self, gift_slug: &str) -> Result<Option<Decimal>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT MIN(CAST(price_ton AS REAL)) FROM listing
                 WHERE gift_slug = ?1 AND sold_at IS NULL
                   AND rarity_tier = 'common'",
                params![gift_slug],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(raw.and_then(|s| Decimal::from_str(&s).ok()))
    }

    /// All catalog slugs known to the system (from prior bulk-adapter
    /// discovery), used to drive per-item adapter scans.
    pub fn catalog_slugs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT slug FROM catalog ORDER BY slug ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// All active listings for a slug, cheapest first.
    pub fn active_listings_for_slug(&self, gift_slug: &str) -> Result<Vec<Listing>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT nft_address, gift_slug, serial_number, rarity_tier, price_ton,
                    marketplace, first_seen_at, last_seen_at
             FROM listing WHERE gift_slug = ?1 AND sold_at IS NULL
             ORDER BY CAST(price_ton AS REAL) ASC",
        )?;
        let rows = stmt.query_map(params![gift_slug], row_to_listing)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn distinct_slugs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT gift_slug FROM listing WHERE sold_at IS NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Timestamp of the most recent sale for a slug, regardless of window.
    pub fn last_sale_at(&self, gift_slug: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT MAX(detected_at) FROM sale WHERE gift_slug = ?1",
                params![gift_slug],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)))
    }

    pub fn sales_since(&self, gift_slug: &str, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT gift_slug, nft_address, serial_number, rarity_tier, sale_price_ton, marketplace, detected_at
             FROM sale WHERE gift_slug = ?1 AND detected_at >= ?2 ORDER BY detected_at ASC",
        )?;
        let rows = stmt.query_map(params![gift_slug, since.to_rfc3339()], row_to_sale)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Oldest-first snapshot floor prices for a slug (used for price
    /// trend computation); one value per scan tick, lowest price seen.
    pub fn floor_price_series(&self, gift_slug: &str, limit: i64) -> Result<Vec<Decimal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT MIN(CAST(price AS REAL)) as floor, scanned_at FROM snapshot
             WHERE gift_slug = ?1
             GROUP BY scanned_at
             ORDER BY scanned_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![gift_slug, limit], |r| {
            let floor: String = r.get(0)?;
            Ok(floor)
        })?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map(|v| v.into_iter().filter_map(|s| Decimal::from_str(&s).ok()).collect())
            .map_err(Into::into)
    }
}

fn median(sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::from(2)
    }
}

fn currency_str(c: Currency) -> &'static str {
    match c {
        Currency::Ton => "ton",
        Currency::Usdt => "usdt",
        Currency::Stars => "stars",
        Currency::Usd => "usd",
    }
}

fn parse_currency(raw: &str) -> Currency {
    match raw {
        "usdt" => Currency::Usdt,
        "stars" => Currency::Stars,
        "usd" => Currency::Usd,
        _ => Currency::Ton,
    }
}

fn parse_tier(raw: &str) -> RarityTier {
    match raw {
        "ultra_rare" => RarityTier::UltraRare,
        "rare" => RarityTier::Rare,
        "uncommon" => RarityTier::Uncommon,
        "common" => RarityTier::Common,
        _ => RarityTier::Unknown,
    }
}

fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<Listing> {
    let price_raw: String = row.get(4)?;
    let tier_raw: String = row.get(3)?;
    let first_seen_raw: String = row.get(6)?;
    let last_seen_raw: String = row.get(7)?;
    Ok(Listing {
        nft_address: row.get(0)?,
        gift_slug: row.get(1)?,
        serial_number: row.get(2)?,
        rarity_tier: parse_tier(&tier_raw),
        price_ton: Decimal::from_str(&price_raw).unwrap_or(Decimal::ZERO),
        marketplace: row.get(5)?,
        first_seen_at: DateTime::parse_from_rfc3339(&first_seen_raw)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_seen_at: DateTime::parse_from_rfc3339(&last_seen_raw)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_sale(row: &rusqlite::Row) -> rusqlite::Result<Sale> {
    let tier_raw: String = row.get(3)?;
    let price_raw: String = row.get(4)?;
    let ts_raw: String = row.get(6)?;
    Ok(Sale {
        gift_slug: row.get(0)?,
        nft_address: row.get(1)?,
        serial_number: row.get(2)?,
        rarity_tier: parse_tier(&tier_raw),
        sale_price_ton: Decimal::from_str(&price_raw).unwrap_or(Decimal::ZERO),
        marketplace: row.get(5)?,
        detected_at: DateTime::parse_from_rfc3339(&ts_raw)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing as ListingModel;

    fn listing(addr: &str, slug: &str, price: &str, now: DateTime<Utc>) -> ListingModel {
        ListingModel {
            nft_address: addr.to_string(),
            gift_slug: slug.to_string(),
            serial_number: Some(42),
            rarity_tier: RarityTier::Rare,
            price_ton: Decimal::from_str(price).unwrap(),
            marketplace: "Fragment".to_string(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    #[test]
    fn insert_then_sell_roundtrips() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let l = listing("addr-1", "plush-pepe", "12.5", now);
        db.apply_reconciliation(now, &[], &[l.clone()], &[]).unwrap();

        let active = db.active_listings().unwrap();
        assert_eq!(active.len(), 1);

        let outcome = db.apply_reconciliation(now, &[l], &[], &[]).unwrap();
        assert_eq!(outcome.sales.len(), 1);
        assert!(db.active_listings().unwrap().is_empty());
    }

    #[test]
    fn sale_dedup_within_one_hour() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let l = listing("addr-2", "plush-pepe", "9.0", now);
        db.apply_reconciliation(now, &[], &[l.clone()], &[]).unwrap();
        let first = db.apply_reconciliation(now, &[l.clone()], &[], &[]).unwrap();
        assert_eq!(first.sales.len(), 1);

        // Re-inserting and re-selling within the hour must not double-record.
        db.apply_reconciliation(now, &[], &[l.clone()], &[]).unwrap();
        let second = db.apply_reconciliation(now, &[l], &[], &[]).unwrap();
        assert_eq!(second.sales.len(), 0);
    }
}
