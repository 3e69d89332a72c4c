use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::db::{i64_to_u64, u64_to_i64};
use crate::error::AllocationError;
use crate::port::repository_sqlx::parse_uuid_field;
use crate::subscription::model::{NewSubscription, Subscription, SubscriptionStatus};
use crate::subscription::repository::SubscriptionRepository;

const SUBSCRIPTION_COLUMNS: &str = r#"
  subscription_id, customer_id, plan_id, order_id, status, port_id, created_at_ms
"#;

/// SQLx-backed implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: AnyPool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn create(
        &self,
        new: &NewSubscription,
        now_ms: u64,
    ) -> Result<Subscription, AllocationError> {
        let subscription_id = Uuid::new_v4();

        sqlx::query(
            r#"
INSERT INTO subscriptions (subscription_id, customer_id, plan_id, order_id, status, created_at_ms)
VALUES (?, ?, ?, ?, 'ACTIVE', ?);
"#,
        )
        .bind(subscription_id.to_string())
        .bind(new.customer_id.to_string())
        .bind(new.plan_id.to_string())
        .bind(new.order_id.map(|o| o.to_string()))
        .bind(u64_to_i64(now_ms)?)
        .execute(&self.pool)
        .await?;

        Ok(Subscription {
            subscription_id,
            customer_id: new.customer_id,
            plan_id: new.plan_id,
            order_id: new.order_id,
            status: SubscriptionStatus::Active,
            port_id: None,
            created_at_ms: now_ms,
        })
    }

    async fn fetch_by_id(
        &self,
        subscription_id: &Uuid,
    ) -> Result<Option<Subscription>, AllocationError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = ?;"
        ))
        .bind(subscription_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_subscription(&r)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        subscription_id: &Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AllocationError> {
        let res = sqlx::query("UPDATE subscriptions SET status = ? WHERE subscription_id = ?;")
            .bind(status.to_string())
            .bind(subscription_id.to_string())
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(AllocationError::SubscriptionNotFound(*subscription_id));
        }

        Ok(())
    }

    async fn fetch_release_candidates(
        &self,
        limit: usize,
    ) -> Result<Vec<Subscription>, AllocationError> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {SUBSCRIPTION_COLUMNS}
FROM subscriptions
WHERE status IN ('EXPIRED', 'CANCELLED') AND port_id IS NOT NULL
ORDER BY created_at_ms, subscription_id
LIMIT ?;
"#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_subscription(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the sweep
                    warn!(error = %e, "skipping malformed subscription row");
                }
            }
        }

        Ok(out)
    }
}

/* =========================
Row mapping
========================= */

pub(crate) fn row_to_subscription(r: &sqlx::any::AnyRow) -> Result<Subscription, AllocationError> {
    let id_str: String = r.get("subscription_id");
    let subscription_id = parse_uuid_field("subscription_id", &id_str)?;

    let status_str: String = r.get("status");
    let status = SubscriptionStatus::from_str(&status_str).map_err(AllocationError::Invariant)?;

    let order_id = match r.get::<Option<String>, _>("order_id") {
        Some(raw) => Some(parse_uuid_field("order_id", &raw)?),
        None => None,
    };

    let port_id = match r.get::<Option<String>, _>("port_id") {
        Some(raw) => Some(parse_uuid_field("port_id", &raw)?),
        None => None,
    };

    Ok(Subscription {
        subscription_id,
        customer_id: parse_uuid_field("customer_id", &r.get::<String, _>("customer_id"))?,
        plan_id: parse_uuid_field("plan_id", &r.get::<String, _>("plan_id"))?,
        order_id,
        status,
        port_id,
        created_at_ms: i64_to_u64(r.get("created_at_ms"))?,
    })
}
