//! Marketplace adapter interface (§4.A) and the concrete adapters built
//! on top of it.

pub mod bulk_aggregator;
pub mod html_scraper;
pub mod narrow_band;
pub mod token_authed;
pub mod virtual_marketplace;

use async_trait::async_trait;

use crate::models::PriceObservation;

/// Static facts about one adapter, used by the scanner to decide whether
/// to call `fetch_all` once or `fetch_one` per catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct AdapterDescriptor {
    pub source_name: &'static str,
    pub supports_bulk: bool,
}

/// One marketplace integration. Every adapter returns a `Result` — there
/// is no panicking path, and a single gift's failure never aborts a
/// bulk fetch for the others.
#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn descriptor(&self) -> AdapterDescriptor;

    /// Fetch the current floor price for one gift slug. Implemented by
    /// every adapter, even bulk ones (used as a fallback/spot-check).
    async fn fetch_one(&self, gift_slug: &str) -> anyhow::Result<Option<PriceObservation>>;

    /// Fetch everything the adapter currently knows about, in one call.
    /// Default: not supported — `descriptor().supports_bulk` must be
    /// checked before calling this.
    async fn fetch_all(&self) -> anyhow::Result<Vec<PriceObservation>> {
        anyhow::bail!("{} does not support bulk fetch", self.descriptor().source_name)
    }
}
