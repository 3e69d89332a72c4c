use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::time::now_ms;

/// Outbound alert channel for pool exhaustion. Best-effort by contract:
/// implementations may fail, and callers must never let that failure reach
/// the allocation result.
#[async_trait]
pub trait CapacityNotifier: Send + Sync {
    async fn notify_exhausted(&self, subscription_id: Uuid) -> anyhow::Result<()>;
}

/// Posts exhaustion events to an operator webhook.
///
/// Duplicate suppression: a burst of allocations against an empty pool
/// produces one page, not one per subscription.
pub struct WebhookNotifier {
    http: Client,
    url: String,
    cooldown_ms: u64,
    last_sent_ms: Mutex<u64>,
}

impl WebhookNotifier {
    pub fn new(url: String, cooldown_ms: u64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            url,
            cooldown_ms,
            last_sent_ms: Mutex::new(0),
        })
    }

    /// Claims a send slot. False while still inside the cooldown window.
    fn claim_send_slot(&self, now: u64) -> bool {
        let mut last = self.last_sent_ms.lock();
        if now.saturating_sub(*last) < self.cooldown_ms && *last != 0 {
            return false;
        }
        *last = now;
        true
    }
}

#[async_trait]
impl CapacityNotifier for WebhookNotifier {
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn notify_exhausted(&self, subscription_id: Uuid) -> anyhow::Result<()> {
        if !self.claim_send_slot(now_ms()) {
            debug!("exhaustion notification suppressed by cooldown");
            return Ok(());
        }

        let payload = serde_json::json!({
            "event": "port_pool_exhausted",
            "subscription_id": subscription_id,
            "at": chrono::Utc::now().to_rfc3339(),
        });

        self.http
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        debug!("operators notified of pool exhaustion");
        Ok(())
    }
}

/// Used when no webhook is configured; the warn log is the whole alert.
pub struct NoopNotifier;

#[async_trait]
impl CapacityNotifier for NoopNotifier {
    async fn notify_exhausted(&self, subscription_id: Uuid) -> anyhow::Result<()> {
        tracing::warn!(%subscription_id, "port pool exhausted; no notification webhook configured");
        Ok(())
    }
}
