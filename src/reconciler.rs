//! Listing reconciler / sales detector (§4.F). Diffs the active listing
//! set against one scan's inbound observations and turns disappearances
//! into inferred sales. Grounded in the reference scanner's
//! `sync_all_listings`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::db::{Db, ReconcileOutcome};
use crate::models::{rarity_tier, Listing, PriceObservation};

/// Reconcile one scan's worth of observations against the currently
/// active listing set and persist the result in a single transaction.
///
/// - addresses present in both: refreshed (`last_seen_at`, price)
/// - addresses only in the inbound set: inserted as new listings
/// - addresses only in the active set: marked sold, with a `Sale` row
///
/// Observations without an `nft_address` (marketplaces with no native
/// per-item id) are never reconciled against the listing table — they
/// only ever contribute `Snapshot` rows.
pub fn reconcile(db: &Db, now: DateTime<Utc>, observations: &[PriceObservation]) -> anyhow::Result<ReconcileOutcome> {
    let active = db.active_listings()?;
    let active_by_addr: HashMap<&str, &Listing> =
        active.iter().map(|l| (l.nft_address.as_str(), l)).collect();

    // Dedup by address within one scan: last observation wins.
    let mut inbound: HashMap<&str, &PriceObservation> = HashMap::new();
    for obs in observations {
        if let Some(addr) = obs.nft_address.as_deref() {
            inbound.insert(addr, obs);
        }
    }

    let mut to_sell = Vec::new();
    for (addr, listing) in &active_by_addr {
        if !inbound.contains_key(addr) {
            to_sell.push((*listing).clone());
        }
    }

    let mut to_insert = Vec::new();
    let mut to_touch = Vec::new();
    for (addr, obs) in &inbound {
        if let Some(existing) = active_by_addr.get(addr) {
            let mut touched = (*existing).clone();
            touched.price_ton = obs.price;
            touched.last_seen_at = now;
            to_touch.push(touched);
        } else {
            let tier = rarity_tier(obs.serial_number, obs.attributes.as_ref());
            to_insert.push(Listing {
                nft_address: addr.to_string(),
                gift_slug: obs.gift_slug.clone(),
                serial_number: obs.serial_number,
                rarity_tier: tier,
                price_ton: obs.price,
                marketplace: obs.marketplace.clone(),
                first_seen_at: now,
                last_seen_at: now,
            });
        }
    }

    db.apply_reconciliation(now, &to_sell, &to_insert, &to_touch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, RarityTier};
    use rust_decimal::Decimal;

    fn obs(addr: &str, slug: &str, price: i64) -> PriceObservation {
        PriceObservation {
            gift_slug: slug.to_string(),
            nft_address: Some(addr.to_string()),
            serial_number: Some(42),
            attributes: None,
            price: Decimal::new(price, 0),
            currency: Currency::Ton,
            marketplace: "Fragment".to_string(),
        }
    }

    #[test]
    fn conservation_total_tracked_equals_active_plus_sold() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();

        reconcile(&db, now, &[obs("a", "pepe", 10), obs("b", "pepe", 12)]).unwrap();
        assert_eq!(db.active_listings().unwrap().len(), 2);

        // "a" disappears (sold), "c" appears new.
        reconcile(&db, now, &[obs("b", "pepe", 12), obs("c", "pepe", 15)]).unwrap();
        let active = db.active_listings().unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|l| l.nft_address == "b"));
        assert!(active.iter().any(|l| l.nft_address == "c"));
    }

    #[test]
    fn sale_is_idempotent_across_repeated_ticks() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        reconcile(&db, now, &[obs("a", "pepe", 10)]).unwrap();
        let outcome1 = reconcile(&db, now, &[]).unwrap();
        assert_eq!(outcome1.sales.len(), 1);

        // Re-running the same empty tick must not record another sale.
        let outcome2 = reconcile(&db, now, &[]).unwrap();
        assert_eq!(outcome2.sales.len(), 0);
    }

    #[test]
    fn snapshot_free_observations_are_never_reconciled() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let headless = PriceObservation {
            gift_slug: "pepe".to_string(),
            nft_address: None,
            serial_number: None,
            attributes: None,
            price: Decimal::new(5, 0),
            currency: Currency::Ton,
            marketplace: "HtmlScraper".to_string(),
        };
        let outcome = reconcile(&db, now, &[headless]).unwrap();
        assert_eq!(outcome.inserted, 0);
        assert!(db.active_listings().unwrap().is_empty());
    }

    #[test]
    fn inferred_tier_matches_serial() {
        let db = Db::open_in_memory().unwrap();
        let now = Utc::now();
        reconcile(&db, now, &[obs("a", "pepe", 10)]).unwrap();
        let active = db.active_listings().unwrap();
        assert_eq!(active[0].rarity_tier, RarityTier::Rare);
    }
}
