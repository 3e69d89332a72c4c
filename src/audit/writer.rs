use std::str::FromStr;

use sqlx::{Any, AnyPool, Row, Transaction};
use uuid::Uuid;

use crate::db::{i64_to_u64, u64_to_i64};
use crate::error::AllocationError;
use crate::port::repository_sqlx::parse_uuid_field;

use super::model::{AllocationAction, AllocationLogEntry, NewLogEntry};

/// Appends one audit row inside the caller's open transaction, so the entry
/// commits or rolls back together with the state change it records.
pub async fn insert_entry(
    tx: &mut Transaction<'_, Any>,
    entry: &NewLogEntry,
) -> Result<(), AllocationError> {
    sqlx::query(
        r#"
INSERT INTO allocation_log (entry_id, port_id, subscription_id, customer_id, action, performed_by, at_ms)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(entry.entry_id.to_string())
    .bind(entry.port_id.to_string())
    .bind(entry.subscription_id.map(|u| u.to_string()))
    .bind(entry.customer_id.map(|u| u.to_string()))
    .bind(entry.action.to_string())
    .bind(entry.performed_by.map(|u| u.to_string()))
    .bind(u64_to_i64(entry.at_ms)?)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Read side of the allocation log, for operator audit views.
/// There is intentionally no update or delete counterpart.
pub struct AuditLog {
    pool: AnyPool,
}

impl AuditLog {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn fetch_for_port(
        &self,
        port_id: &Uuid,
    ) -> Result<Vec<AllocationLogEntry>, AllocationError> {
        let rows = sqlx::query(
            r#"
SELECT entry_id, port_id, subscription_id, customer_id, action, performed_by, at_ms
FROM allocation_log
WHERE port_id = ?
ORDER BY at_ms;
"#,
        )
        .bind(port_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn fetch_recent(
        &self,
        limit: usize,
    ) -> Result<Vec<AllocationLogEntry>, AllocationError> {
        let rows = sqlx::query(
            r#"
SELECT entry_id, port_id, subscription_id, customer_id, action, performed_by, at_ms
FROM allocation_log
ORDER BY at_ms DESC
LIMIT ?;
"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(r: &sqlx::any::AnyRow) -> Result<AllocationLogEntry, AllocationError> {
    let action_str: String = r.get("action");
    let action = AllocationAction::from_str(&action_str).map_err(AllocationError::Invariant)?;

    let opt_uuid = |field: &str| -> Result<Option<Uuid>, AllocationError> {
        match r.get::<Option<String>, _>(field) {
            Some(raw) => Ok(Some(parse_uuid_field(field, &raw)?)),
            None => Ok(None),
        }
    };

    Ok(AllocationLogEntry {
        entry_id: parse_uuid_field("entry_id", &r.get::<String, _>("entry_id"))?,
        port_id: parse_uuid_field("port_id", &r.get::<String, _>("port_id"))?,
        subscription_id: opt_uuid("subscription_id")?,
        customer_id: opt_uuid("customer_id")?,
        action,
        performed_by: opt_uuid("performed_by")?,
        at_ms: i64_to_u64(r.get("at_ms"))?,
    })
}
