#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    // =========================
    // Allocation configuration
    // =========================
    /// Maximum number of AVAILABLE candidates fetched per allocation attempt.
    ///
    /// Candidates are tried in creation order; a candidate is skipped when a
    /// concurrent allocator wins its compare-and-set. This bounds how far a
    /// single request scans past lost races before falling back to
    /// PENDING_ALLOCATION.
    pub alloc_max_candidates: usize,

    // =========================
    // Sweeper configuration
    // =========================
    /// Cadence (ms) of the reconciliation loop that releases ports still
    /// linked to expired or cancelled subscriptions.
    pub sweep_interval_ms: u64,

    /// Maximum subscriptions inspected per sweep pass.
    ///
    /// Bounds transaction count per tick; leftovers are picked up on the
    /// next pass.
    pub sweep_batch_size: usize,

    // =========================
    // Operator notification
    // =========================
    /// Webhook endpoint alerted when the pool is exhausted.
    /// Unset => notifications are dropped (logged only).
    pub notify_webhook_url: Option<String>,

    /// Minimum gap (ms) between two exhaustion notifications.
    ///
    /// A burst of post-payment allocations against an empty pool would
    /// otherwise page the operator once per subscription.
    pub notify_cooldown_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://portdesk_dev.db".to_string());

        let notify_webhook_url = std::env::var("NOTIFY_WEBHOOK_URL").ok();

        Self {
            database_url,

            // Allocation defaults:
            // - a handful of candidates absorbs realistic race storms
            alloc_max_candidates: 8,

            // Sweeper defaults:
            sweep_interval_ms: 30_000,
            sweep_batch_size: 64,

            // Notification defaults:
            notify_webhook_url,
            notify_cooldown_ms: 300_000,
        }
    }
}
