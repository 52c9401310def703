//! Token-authed API adapter: requires a bearer token obtained by
//! exchanging a signed initialization payload, cached for its TTL and
//! invalidated immediately on 401/403 rather than retried. Grounded in
//! the reference scanner's Portals token-auth flow.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;

use crate::adapters::{AdapterDescriptor, MarketplaceAdapter};
use crate::config::SourceLimits;
use crate::models::{Currency, PriceObservation};
use crate::normalizer::normalize;
use crate::ratelimit::SlidingWindowLimiter;

const TOKEN_TTL: Duration = Duration::from_secs(12 * 3600);

type HmacSha256 = Hmac<Sha256>;

struct TokenCache {
    token: Option<String>,
    fetched_at: Option<Instant>,
}

pub struct TokenAuthedAdapter {
    client: Client,
    limiter: SlidingWindowLimiter,
    base_url: String,
    secret: Option<String>,
    seed_token: Option<String>,
    cache: Mutex<TokenCache>,
}

impl TokenAuthedAdapter {
    pub fn new(base_url: impl Into<String>, seed_token: Option<String>, secret: Option<String>, limits: SourceLimits) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build http client"),
            limiter: SlidingWindowLimiter::new("token_authed", &limits),
            base_url: base_url.into(),
            secret,
            seed_token,
            cache: Mutex::new(TokenCache { token: None, fetched_at: None }),
        }
    }

    /// Sign a nonce+timestamp initialization payload with HMAC-SHA256,
    /// the same idiom the teacher uses for its own authenticated API.
    fn sign_init_payload(&self, nonce: &str, timestamp: i64) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(format!("{nonce}:{timestamp}").as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    async fn token(&self) -> anyhow::Result<String> {
        {
            let cache = self.cache.lock();
            if let (Some(tok), Some(at)) = (&cache.token, cache.fetched_at) {
                if at.elapsed() < TOKEN_TTL {
                    return Ok(tok.clone());
                }
            }
        }

        if let Some(seed) = &self.seed_token {
            let mut cache = self.cache.lock();
            cache.token = Some(seed.clone());
            cache.fetched_at = Some(Instant::now());
            return Ok(seed.clone());
        }

        let nonce = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self
            .sign_init_payload(&nonce, timestamp)
            .ok_or_else(|| anyhow::anyhow!("no auth secret configured, cannot mint token"))?;

        let resp: TokenResponse = self
            .client
            .post(format!("{}/auth/exchange", self.base_url))
            .json(&serde_json::json!({ "nonce": nonce, "timestamp": timestamp, "signature": signature }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut cache = self.cache.lock();
        cache.token = Some(resp.token.clone());
        cache.fetched_at = Some(Instant::now());
        Ok(resp.token)
    }

    fn invalidate(&self) {
        let mut cache = self.cache.lock();
        cache.token = None;
        cache.fetched_at = None;
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct FloorsResponse {
    #[serde(default)]
    floors: Vec<FloorEntry>,
}

#[derive(Deserialize)]
struct FloorEntry {
    name: String,
    #[serde(rename = "floorPrice")]
    floor_price: String,
}

#[async_trait]
impl MarketplaceAdapter for TokenAuthedAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor { source_name: "token_authed", supports_bulk: true }
    }

    async fn fetch_one(&self, gift_slug: &str) -> anyhow::Result<Option<PriceObservation>> {
        Ok(self.fetch_all().await?.into_iter().find(|o| o.gift_slug == gift_slug))
    }

    async fn fetch_all(&self) -> anyhow::Result<Vec<PriceObservation>> {
        self.limiter.acquire().await;
        let token = self.token().await?;

        let resp = self
            .client
            .post(format!("{}/market/filterFloors", self.base_url))
            .bearer_auth(&token)
            .send()
            .await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("token-authed adapter received {}, invalidating cached token", resp.status());
                self.invalidate();
                anyhow::bail!("token rejected: {}", resp.status());
            }
            s if s.is_success() => {}
            s => anyhow::bail!("token-authed adapter returned {s}"),
        }

        let parsed: FloorsResponse = resp.json().await?;
        Ok(parsed
            .floors
            .into_iter()
            .filter_map(|f| {
                let price = f.floor_price.parse::<Decimal>().ok()?;
                let gift_slug = normalize(&f.name);
                if gift_slug.is_empty() {
                    return None;
                }
                Some(PriceObservation {
                    gift_slug,
                    nft_address: None,
                    serial_number: None,
                    attributes: None,
                    price,
                    currency: Currency::Ton,
                    marketplace: "Portals".to_string(),
                })
            })
            .collect())
    }
}
