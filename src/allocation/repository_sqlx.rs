use async_trait::async_trait;
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::allocation::repository::AllocationRepository;
use crate::allocation::types::{AssignWrite, ReleaseReport};
use crate::audit::model::NewLogEntry;
use crate::audit::writer::insert_entry;
use crate::db::u64_to_i64;
use crate::error::AllocationError;
use crate::port::model::{Port, PortState};
use crate::port::repository_sqlx::{parse_uuid_field, row_to_port};

/// SQLx-backed implementation of the allocation composites.
///
/// The compare-and-set idiom throughout: a conditional UPDATE whose WHERE
/// clause restates the expected current state, with the affected-row count
/// deciding who won. Isolation level is whatever the store defaults to;
/// read-committed is enough because the CAS, not range locking, is the
/// correctness mechanism.
pub struct SqlxAllocationRepository {
    pool: AnyPool,
}

impl SqlxAllocationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_port_tx(
        tx: &mut Transaction<'_, Any>,
        port_id: &Uuid,
    ) -> Result<Option<Port>, AllocationError> {
        let row = sqlx::query(
            r#"
SELECT port_id, url, note, state,
       assigned_subscription_id, assigned_customer_id, assigned_at_ms,
       created_at_ms
FROM ports
WHERE port_id = ?;
"#,
        )
        .bind(port_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_port(&r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AllocationRepository for SqlxAllocationRepository {
    #[instrument(
        skip(self),
        target = "allocation_repo",
        fields(port_id = %port_id, subscription_id = %subscription_id)
    )]
    async fn assign(
        &self,
        port_id: &Uuid,
        subscription_id: &Uuid,
        customer_id: &Uuid,
        now_ms: u64,
    ) -> Result<AssignWrite, AllocationError> {
        let mut tx = self.pool.begin().await?;

        // The compare-and-set. Zero rows = a concurrent allocator took this
        // port (or it left AVAILABLE some other way); either way, not ours.
        let seized = sqlx::query(
            r#"
UPDATE ports
SET state = 'ASSIGNED', assigned_subscription_id = ?, assigned_customer_id = ?, assigned_at_ms = ?
WHERE port_id = ? AND state = 'AVAILABLE';
"#,
        )
        .bind(subscription_id.to_string())
        .bind(customer_id.to_string())
        .bind(u64_to_i64(now_ms)?)
        .bind(port_id.to_string())
        .execute(&mut *tx)
        .await?;

        if seized.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("lost compare-and-set on port");
            return Ok(AssignWrite::LostRace);
        }

        // Guarded link write keeps "one port per subscription" intact even
        // against a concurrent allocator for the same subscription.
        let linked = sqlx::query(
            r#"
UPDATE subscriptions
SET port_id = ?, status = 'ACTIVE'
WHERE subscription_id = ? AND port_id IS NULL;
"#,
        )
        .bind(port_id.to_string())
        .bind(subscription_id.to_string())
        .execute(&mut *tx)
        .await?;

        if linked.rows_affected() == 0 {
            tx.rollback().await?;

            let exists = sqlx::query("SELECT subscription_id FROM subscriptions WHERE subscription_id = ?;")
                .bind(subscription_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            return Err(match exists {
                Some(_) => AllocationError::AlreadyAssigned(*subscription_id),
                None => AllocationError::SubscriptionNotFound(*subscription_id),
            });
        }

        insert_entry(
            &mut tx,
            &NewLogEntry::assign(*port_id, *subscription_id, *customer_id, now_ms),
        )
        .await?;

        let port = Self::fetch_port_tx(&mut tx, port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))?;

        tx.commit().await?;

        Ok(AssignWrite::Committed(port))
    }

    #[instrument(
        skip(self),
        target = "allocation_repo",
        fields(port_id = %port_id, new_subscription_id = %new_subscription_id, operator_id = %operator_id)
    )]
    async fn reassign(
        &self,
        port_id: &Uuid,
        new_subscription_id: &Uuid,
        operator_id: &Uuid,
        now_ms: u64,
    ) -> Result<Port, AllocationError> {
        let mut tx = self.pool.begin().await?;

        let port = Self::fetch_port_tx(&mut tx, port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))?;

        if port.state == PortState::Disabled {
            return Err(AllocationError::PortDisabled(*port_id));
        }

        let old_subscription = port.assignment.map(|a| a.subscription_id);

        // Target preconditions checked before any mutation: the invariant
        // must hold at every point inside the transaction too.
        let target = sqlx::query(
            "SELECT customer_id, port_id FROM subscriptions WHERE subscription_id = ?;",
        )
        .bind(new_subscription_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AllocationError::SubscriptionNotFound(*new_subscription_id))?;

        if target.get::<Option<String>, _>("port_id").is_some() {
            return Err(AllocationError::AlreadyAssigned(*new_subscription_id));
        }
        let customer_id =
            parse_uuid_field("customer_id", &target.get::<String, _>("customer_id"))?;

        // Conditional re-point; the state may have moved since the read.
        let repointed = sqlx::query(
            r#"
UPDATE ports
SET state = 'ASSIGNED', assigned_subscription_id = ?, assigned_customer_id = ?, assigned_at_ms = ?
WHERE port_id = ? AND state != 'DISABLED';
"#,
        )
        .bind(new_subscription_id.to_string())
        .bind(customer_id.to_string())
        .bind(u64_to_i64(now_ms)?)
        .bind(port_id.to_string())
        .execute(&mut *tx)
        .await?;

        if repointed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AllocationError::ConflictRetryable(*port_id));
        }

        if let Some(old) = old_subscription {
            sqlx::query(
                "UPDATE subscriptions SET port_id = NULL WHERE subscription_id = ? AND port_id = ?;",
            )
            .bind(old.to_string())
            .bind(port_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        let linked = sqlx::query(
            r#"
UPDATE subscriptions
SET port_id = ?, status = 'ACTIVE'
WHERE subscription_id = ? AND port_id IS NULL;
"#,
        )
        .bind(port_id.to_string())
        .bind(new_subscription_id.to_string())
        .execute(&mut *tx)
        .await?;

        if linked.rows_affected() == 0 {
            // Raced by an allocator that linked the target after our read.
            tx.rollback().await?;
            return Err(AllocationError::AlreadyAssigned(*new_subscription_id));
        }

        insert_entry(
            &mut tx,
            &NewLogEntry::reassign(
                *port_id,
                *new_subscription_id,
                customer_id,
                *operator_id,
                now_ms,
            ),
        )
        .await?;

        let port = Self::fetch_port_tx(&mut tx, port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))?;

        tx.commit().await?;

        Ok(port)
    }

    #[instrument(
        skip(self),
        target = "allocation_repo",
        fields(port_id = %port_id)
    )]
    async fn release(
        &self,
        port_id: &Uuid,
        operator_id: Option<&Uuid>,
        now_ms: u64,
    ) -> Result<ReleaseReport, AllocationError> {
        let mut tx = self.pool.begin().await?;

        let port = Self::fetch_port_tx(&mut tx, port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))?;

        // Disabled ports never silently return to the pool, and an already
        // free port has nothing to release. Both are no-op successes, and
        // neither writes a log entry: no state changed.
        if port.state == PortState::Disabled || port.state == PortState::Available {
            return Ok(ReleaseReport {
                port_id: *port_id,
                cleared_subscription: None,
                changed: false,
            });
        }

        let freed = sqlx::query(
            r#"
UPDATE ports
SET state = 'AVAILABLE', assigned_subscription_id = NULL, assigned_customer_id = NULL, assigned_at_ms = NULL
WHERE port_id = ? AND state = ?;
"#,
        )
        .bind(port_id.to_string())
        .bind(port.state.to_string())
        .execute(&mut *tx)
        .await?;

        if freed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AllocationError::ConflictRetryable(*port_id));
        }

        let cleared_subscription = port.assignment.map(|a| a.subscription_id);
        if let Some(sub) = cleared_subscription {
            sqlx::query(
                "UPDATE subscriptions SET port_id = NULL WHERE subscription_id = ? AND port_id = ?;",
            )
            .bind(sub.to_string())
            .bind(port_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        insert_entry(
            &mut tx,
            &NewLogEntry::release(
                *port_id,
                cleared_subscription,
                port.assignment.map(|a| a.customer_id),
                operator_id.copied(),
                now_ms,
            ),
        )
        .await?;

        tx.commit().await?;

        Ok(ReleaseReport {
            port_id: *port_id,
            cleared_subscription,
            changed: true,
        })
    }
}
