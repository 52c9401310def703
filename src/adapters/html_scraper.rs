//! HTML scraper adapter: no structured API, so the floor price is pulled
//! out of a rendered listings page with a three-strategy fallback chain.
//! Grounded in the reference scanner's Fragment parser.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;

use crate::adapters::{AdapterDescriptor, MarketplaceAdapter};
use crate::config::SourceLimits;
use crate::models::{Currency, PriceObservation};
use crate::ratelimit::{retry, RetryableError, SlidingWindowLimiter};

pub struct HtmlScraperAdapter {
    client: Client,
    limiter: SlidingWindowLimiter,
    limits: SourceLimits,
    base_url: String,
    marketplace: &'static str,
}

impl HtmlScraperAdapter {
    pub fn new(base_url: impl Into<String>, limits: SourceLimits) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .user_agent("Mozilla/5.0 (compatible; giftscan/0.1)")
                .build()
                .expect("failed to build http client"),
            limiter: SlidingWindowLimiter::new("html_scraper", &limits),
            limits,
            base_url: base_url.into(),
            marketplace: "Fragment",
        }
    }

    async fn fetch_listing_page(&self, gift_slug: &str) -> anyhow::Result<String> {
        self.limiter.acquire().await;
        let url = format!("{}/{}?sort=price_asc&filter=sale", self.base_url, gift_slug);

        retry("html_scraper", &self.limits, || {
            let url = url.clone();
            let client = self.client.clone();
            async move {
                match client.get(&url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        resp.text().await.map_err(|e| RetryableError::Transient(e.into()))
                    }
                    Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                        Err(RetryableError::Transient(anyhow::anyhow!("rate limited")))
                    }
                    Ok(resp) => Err(RetryableError::Fatal(anyhow::anyhow!("http {}", resp.status()))),
                    Err(e) => Err(RetryableError::Transient(e.into())),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl MarketplaceAdapter for HtmlScraperAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor { source_name: "html_scraper", supports_bulk: false }
    }

    async fn fetch_one(&self, gift_slug: &str) -> anyhow::Result<Option<PriceObservation>> {
        let html = self.fetch_listing_page(gift_slug).await?;
        let Some(price) = parse_floor_price(&html) else {
            return Ok(None);
        };
        Ok(Some(PriceObservation {
            gift_slug: gift_slug.to_string(),
            nft_address: None,
            serial_number: None,
            attributes: None,
            price,
            currency: Currency::Ton,
            marketplace: self.marketplace.to_string(),
        }))
    }
}

/// Three-strategy floor price extraction, in order of decreasing
/// confidence: a structured table-row price cell, a number immediately
/// following the word "TON" in the text, then a raw first-number regex
/// scan as a last resort.
fn parse_floor_price(html: &str) -> Option<Decimal> {
    structured_row_price(html)
        .or_else(|| text_neighbor_price(html))
        .or_else(|| raw_regex_price(html))
}

fn structured_row_price(html: &str) -> Option<Decimal> {
    let marker = "class=\"tm-value\"";
    let idx = html.find(marker)?;
    let after = &html[idx..];
    let gt = after.find('>')?;
    let rest = &after[gt + 1..];
    let close = rest.find('<')?;
    text_to_decimal(&rest[..close])
}

fn text_neighbor_price(html: &str) -> Option<Decimal> {
    let idx = html.find("TON")?;
    let before = &html[..idx];
    let start = before
        .rfind(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    text_to_decimal(&before[start..])
}

fn raw_regex_price(html: &str) -> Option<Decimal> {
    let mut number = String::new();
    for c in html.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
        } else if !number.is_empty() {
            break;
        }
    }
    text_to_decimal(&number)
}

fn text_to_decimal(s: &str) -> Option<Decimal> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_row_wins_when_present() {
        let html = r#"<div class="tm-value">12,500</div>"#;
        assert_eq!(parse_floor_price(html), Some(Decimal::new(125_00, 1)));
    }

    #[test]
    fn falls_back_to_text_neighbor() {
        let html = "<span>Floor: 7.5 TON</span>";
        assert_eq!(parse_floor_price(html), Some(Decimal::new(75, 1)));
    }

    #[test]
    fn falls_back_to_raw_regex_as_last_resort() {
        let html = "no markers here, just 42 loose";
        assert_eq!(parse_floor_price(html), Some(Decimal::new(42, 0)));
    }

    #[test]
    fn empty_page_yields_none() {
        assert_eq!(parse_floor_price("<html></html>"), None);
    }
}
