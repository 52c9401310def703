//! Bulk indexed aggregator — one HTTP-indexed blockchain API that returns
//! every active listing across many collections in a handful of paged
//! calls. Grounded in the reference scanner's TonAPI-backed parser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterDescriptor, MarketplaceAdapter};
use crate::config::SourceLimits;
use crate::models::{Attributes, Currency, PriceObservation};
use crate::normalizer::normalize;
use crate::ratelimit::{retry, RetryableError, SlidingWindowLimiter};

/// Page size and the per-collection safety cap that stops a runaway
/// pagination loop from hammering the API if the "has more" signal is
/// ever wrong.
const PAGE_SIZE: u32 = 1000;
const PER_COLLECTION_CAP: u32 = 500;

/// One nano-TON is 10^-9 TON.
const NANO_PER_TON: i64 = 1_000_000_000;

#[derive(Debug, Deserialize)]
struct NftItemsResponse {
    #[serde(default)]
    nft_items: Vec<RawNftItem>,
}

#[derive(Debug, Deserialize)]
struct RawNftItem {
    address: String,
    #[serde(default)]
    sale: Option<RawSale>,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawSale {
    price: RawPrice,
    #[serde(default)]
    market: Option<RawMarket>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    attributes: Option<Vec<RawAttribute>>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    trait_type: String,
    value: String,
}

/// Marketplace contract-address lookup table, used when a sale record
/// doesn't carry a market name directly.
fn marketplace_contracts() -> &'static [(&'static str, &'static str)] {
    &[
        ("EQD-McMb2Ah9oM8mweGhw6LFGUm3G1Kh7_aj6G14vUd-OCwx", "Fragment"),
        ("EQBIMRFvCgxE8dH5ClXh5VeNhe1j5W-CdzD6fWNqoAOKFqm", "GetGems"),
        ("EQCCgTsCS6_F3e9D6nMrFcSHVFw2PhpMwwxOCdrtRw_sdSZ4", "Portals"),
    ]
}

pub struct BulkIndexedAggregator {
    client: Client,
    limiter: SlidingWindowLimiter,
    limits: SourceLimits,
    api_key: Option<String>,
    collections: Vec<&'static str>,
}

impl BulkIndexedAggregator {
    pub fn new(api_key: Option<String>, limits: SourceLimits) -> Self {
        let limiter = SlidingWindowLimiter::new("bulk_aggregator", &limits);
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("giftscan/0.1")
                .build()
                .expect("failed to build http client"),
            limiter,
            limits,
            api_key,
            collections: vec![
                "EQCollectionAddressOne",
                "EQCollectionAddressTwo",
                "EQCollectionAddressThree",
            ],
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match &self.api_key {
            Some(key) => vec![("Authorization", format!("Bearer {key}"))],
            None => vec![],
        }
    }

    async fn fetch_collection(&self, collection: &str) -> anyhow::Result<Vec<PriceObservation>> {
        let mut out = Vec::new();
        let mut offset: u32 = 0;

        loop {
            self.limiter.acquire().await;

            let url = format!("https://tonapi.io/v2/nfts/collections/{collection}/items");
            let mut req = self
                .client
                .get(&url)
                .query(&[("limit", PAGE_SIZE.to_string()), ("offset", offset.to_string())]);
            for (k, v) in self.headers() {
                req = req.header(k, v);
            }

            let response = retry("bulk_aggregator", &self.limits, || {
                let req = req.try_clone().expect("cloneable request");
                async move {
                    match req.send().await {
                        Ok(resp) if resp.status().is_success() => Ok(resp),
                        Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                            Err(RetryableError::Transient(anyhow::anyhow!("rate limited")))
                        }
                        Ok(resp) => Err(RetryableError::Fatal(anyhow::anyhow!(
                            "bulk aggregator returned {}",
                            resp.status()
                        ))),
                        Err(e) => Err(RetryableError::Transient(e.into())),
                    }
                }
            })
            .await?;

            let parsed: NftItemsResponse = response.json().await?;
            let page_len = parsed.nft_items.len() as u32;

            for item in parsed.nft_items {
                if let Some(obs) = parse_nft_item(item) {
                    out.push(obs);
                }
            }

            offset += PAGE_SIZE;
            if page_len < PAGE_SIZE || offset >= PER_COLLECTION_CAP {
                break;
            }
        }

        debug!(collection, count = out.len(), "bulk aggregator collection scanned");
        Ok(out)
    }
}

fn parse_nft_item(item: RawNftItem) -> Option<PriceObservation> {
    let sale = item.sale?;
    let nano: i64 = sale.price.value.parse().ok()?;
    let price = Decimal::new(nano, 0) / Decimal::new(NANO_PER_TON, 0);

    let metadata = item.metadata.unwrap_or_default();
    let name = metadata.name.clone().unwrap_or_default();
    let gift_slug = normalize(&name);
    if gift_slug.is_empty() {
        return None;
    }

    let serial_number = extract_serial(&name);

    let attributes: Attributes = metadata
        .attributes
        .unwrap_or_default()
        .into_iter()
        .map(|a| (a.trait_type, a.value))
        .collect();

    let marketplace = detect_marketplace(sale.market.as_ref());

    Some(PriceObservation {
        gift_slug,
        nft_address: Some(item.address),
        serial_number,
        attributes: Some(attributes),
        price,
        currency: Currency::Ton,
        marketplace,
    })
}

fn extract_serial(name: &str) -> Option<u32> {
    let hash_pos = name.find('#')?;
    name[hash_pos + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
}

fn detect_marketplace(market: Option<&RawMarket>) -> String {
    if let Some(name) = market.and_then(|m| m.name.clone()) {
        if !name.is_empty() {
            return name;
        }
    }
    "Unknown".to_string()
}

#[async_trait]
impl MarketplaceAdapter for BulkIndexedAggregator {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            source_name: "bulk_aggregator",
            supports_bulk: true,
        }
    }

    async fn fetch_one(&self, gift_slug: &str) -> anyhow::Result<Option<PriceObservation>> {
        let all = self.fetch_all().await?;
        Ok(all.into_iter().find(|o| o.gift_slug == gift_slug))
    }

    async fn fetch_all(&self) -> anyhow::Result<Vec<PriceObservation>> {
        let mut out = Vec::new();
        for collection in Arc::new(self.collections.clone()).iter() {
            match self.fetch_collection(collection).await {
                Ok(mut items) => out.append(&mut items),
                Err(e) => warn!(collection, error = %e, "collection scan failed, skipping"),
            }
        }
        info!(count = out.len(), "bulk aggregator scan complete");
        Ok(out)
    }
}
