//! Message delivery boundary. The core only needs to hand a formatted
//! string to something; the real push-transport is an external
//! collaborator out of scope (§6) — this module ships the trait plus a
//! logging-only implementation so the daemon runs standalone.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Default sink: writes the message to the log instead of pushing it
/// anywhere. Used when no real transport is configured.
pub struct LoggingSink;

#[async_trait]
impl MessageSink for LoggingSink {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        info!(%message, "alert");
        Ok(())
    }
}

/// Cache-invalidation boundary for the (external, out-of-scope) read
/// cache in front of the API layer. A no-op logging implementation lets
/// the scanner call it unconditionally without knowing whether a real
/// cache exists.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, namespace: &str);
}

pub struct LoggingCacheInvalidator;

impl CacheInvalidator for LoggingCacheInvalidator {
    fn invalidate(&self, namespace: &str) {
        tracing::debug!(namespace, "cache invalidation requested (no-op sink)");
    }
}
