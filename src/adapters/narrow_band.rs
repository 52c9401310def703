//! Narrow-band aggregator: a marketplace whose search API only supports
//! filtering by price range, not offset pagination, so full coverage
//! requires walking increasingly narrow price bands until the tail is
//! empty.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::adapters::{AdapterDescriptor, MarketplaceAdapter};
use crate::config::SourceLimits;
use crate::models::{Currency, PriceObservation};
use crate::normalizer::normalize;
use crate::ratelimit::SlidingWindowLimiter;

/// Stop widening the scan once this many consecutive bands come back
/// empty — the remaining inventory is assumed exhausted.
const MAX_CONSECUTIVE_EMPTY_BANDS: u32 = 3;
const MAX_BANDS: u32 = 200;

#[derive(Deserialize)]
struct BandResponse {
    #[serde(default)]
    items: Vec<BandItem>,
}

#[derive(Deserialize)]
struct BandItem {
    name: String,
    price: String,
}

pub struct NarrowBandAggregator {
    client: Client,
    limiter: SlidingWindowLimiter,
    base_url: String,
    marketplace: &'static str,
    band_width: Decimal,
}

impl NarrowBandAggregator {
    pub fn new(base_url: impl Into<String>, limits: SourceLimits) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(15)).build().expect("http client"),
            limiter: SlidingWindowLimiter::new("narrow_band", &limits),
            base_url: base_url.into(),
            marketplace: "TelegramMarket",
            band_width: Decimal::new(5, 1), // 0.5 TON bands
        }
    }

    async fn fetch_band(&self, low: Decimal, high: Decimal) -> anyhow::Result<Vec<BandItem>> {
        self.limiter.acquire().await;
        let resp: BandResponse = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("min_price", low.to_string()), ("max_price", high.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.items)
    }
}

#[async_trait]
impl MarketplaceAdapter for NarrowBandAggregator {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor { source_name: "narrow_band", supports_bulk: true }
    }

    async fn fetch_one(&self, gift_slug: &str) -> anyhow::Result<Option<PriceObservation>> {
        Ok(self.fetch_all().await?.into_iter().find(|o| o.gift_slug == gift_slug))
    }

    async fn fetch_all(&self) -> anyhow::Result<Vec<PriceObservation>> {
        let mut out = Vec::new();
        let mut low = Decimal::ZERO;
        let mut consecutive_empty = 0u32;
        let mut bands_scanned = 0u32;

        while consecutive_empty < MAX_CONSECUTIVE_EMPTY_BANDS && bands_scanned < MAX_BANDS {
            let high = low + self.band_width;
            let items = self.fetch_band(low, high).await?;

            if items.is_empty() {
                consecutive_empty += 1;
            } else {
                consecutive_empty = 0;
                for item in items {
                    let Ok(price) = item.price.parse::<Decimal>() else { continue };
                    let gift_slug = normalize(&item.name);
                    if gift_slug.is_empty() {
                        continue;
                    }
                    out.push(PriceObservation {
                        gift_slug,
                        nft_address: None,
                        serial_number: None,
                        attributes: None,
                        price,
                        currency: Currency::Ton,
                        marketplace: self.marketplace.to_string(),
                    });
                }
            }

            low = high;
            bands_scanned += 1;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_width_is_positive() {
        let a = NarrowBandAggregator::new("https://example.invalid", SourceLimits::default());
        assert!(a.band_width > Decimal::ZERO);
    }
}
