use std::str::FromStr;

use async_trait::async_trait;
use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::{AnyPool, Row};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::model::NewLogEntry;
use crate::audit::writer::insert_entry;
use crate::db::{i64_to_u64, u64_to_i64};
use crate::error::AllocationError;
use crate::port::model::{Assignment, Port, PortDescriptor, PortState};
use crate::port::repository::PortRepository;

const PORT_COLUMNS: &str = r#"
  port_id, url, note, state,
  assigned_subscription_id, assigned_customer_id, assigned_at_ms,
  created_at_ms
"#;

/// SQLx-backed implementation of PortRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxPortRepository {
    pool: AnyPool,
}

impl SqlxPortRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortRepository for SqlxPortRepository {
    #[instrument(skip(self, descriptor), target = "port_repo", fields(url = %descriptor.url))]
    async fn create(
        &self,
        descriptor: &PortDescriptor,
        operator_id: &Uuid,
        now_ms: u64,
    ) -> Result<Port, AllocationError> {
        let mut tx = self.pool.begin().await?;

        let taken = sqlx::query("SELECT port_id FROM ports WHERE url = ?;")
            .bind(&descriptor.url)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(AllocationError::DuplicateUrl(descriptor.url.clone()));
        }

        let port_id = Uuid::new_v4();

        sqlx::query(
            r#"
INSERT INTO ports (port_id, url, note, state, created_at_ms)
VALUES (?, ?, ?, 'AVAILABLE', ?);
"#,
        )
        .bind(port_id.to_string())
        .bind(&descriptor.url)
        .bind(&descriptor.note)
        .bind(u64_to_i64(now_ms)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(&descriptor.url, e))?;

        insert_entry(&mut tx, &NewLogEntry::create(port_id, *operator_id, now_ms)).await?;

        tx.commit().await?;

        info!(%port_id, "port registered");

        Port::from_parts(
            port_id,
            descriptor.url.clone(),
            descriptor.note.clone(),
            PortState::Available,
            None,
            now_ms,
        )
    }

    async fn fetch_by_id(&self, port_id: &Uuid) -> Result<Option<Port>, AllocationError> {
        let row = sqlx::query(&format!(
            "SELECT {PORT_COLUMNS} FROM ports WHERE port_id = ?;"
        ))
        .bind(port_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_port(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_by_url(&self, url: &str) -> Result<Option<Port>, AllocationError> {
        let row = sqlx::query(&format!("SELECT {PORT_COLUMNS} FROM ports WHERE url = ?;"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_port(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_available(&self, limit: usize) -> Result<Vec<Port>, AllocationError> {
        let rows = sqlx::query(&format!(
            r#"
SELECT {PORT_COLUMNS}
FROM ports
WHERE state = 'AVAILABLE'
ORDER BY created_at_ms, port_id
LIMIT ?;
"#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_port(&r) {
                Ok(p) => out.push(p),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the batch
                    warn!(error = %e, "skipping malformed port row");
                }
            }
        }

        Ok(out)
    }

    async fn count_available(&self) -> Result<u64, AllocationError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ports WHERE state = 'AVAILABLE';")
            .fetch_one(&self.pool)
            .await?;

        i64_to_u64(n)
    }

    #[instrument(skip(self), target = "port_repo", fields(port_id = %port_id))]
    async fn update(
        &self,
        port_id: &Uuid,
        url: &str,
        note: Option<&str>,
    ) -> Result<Port, AllocationError> {
        if let Some(other) = self.fetch_by_url(url).await? {
            if other.port_id != *port_id {
                return Err(AllocationError::DuplicateUrl(url.to_string()));
            }
        }

        let res = sqlx::query("UPDATE ports SET url = ?, note = ? WHERE port_id = ?;")
            .bind(url)
            .bind(note)
            .bind(port_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique_violation(url, e))?;

        if res.rows_affected() == 0 {
            return Err(AllocationError::PortNotFound(*port_id));
        }

        self.fetch_by_id(port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))
    }

    #[instrument(
        skip(self),
        target = "port_repo",
        fields(port_id = %port_id, new_state = %new_state, operator_id = %operator_id)
    )]
    async fn set_state(
        &self,
        port_id: &Uuid,
        new_state: PortState,
        operator_id: &Uuid,
    ) -> Result<Port, AllocationError> {
        if new_state == PortState::Assigned {
            return Err(AllocationError::Invariant(
                "ASSIGNED is entered through allocation, not a manual state move".to_string(),
            ));
        }

        let res = sqlx::query("UPDATE ports SET state = ? WHERE port_id = ? AND state != 'ASSIGNED';")
            .bind(new_state.to_string())
            .bind(port_id.to_string())
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(match self.fetch_by_id(port_id).await? {
                Some(_) => AllocationError::PortAssigned(*port_id),
                None => AllocationError::PortNotFound(*port_id),
            });
        }

        info!("port state changed manually");

        self.fetch_by_id(port_id)
            .await?
            .ok_or(AllocationError::PortNotFound(*port_id))
    }

    async fn delete(&self, port_id: &Uuid) -> Result<(), AllocationError> {
        let res = sqlx::query("DELETE FROM ports WHERE port_id = ? AND state != 'ASSIGNED';")
            .bind(port_id.to_string())
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(match self.fetch_by_id(port_id).await? {
                Some(_) => AllocationError::PortAssigned(*port_id),
                None => AllocationError::PortNotFound(*port_id),
            });
        }

        Ok(())
    }
}

/* =========================
Row mapping + conversions
========================= */

pub(crate) fn row_to_port(r: &sqlx::any::AnyRow) -> Result<Port, AllocationError> {
    let id_str: String = r.get("port_id");
    let port_id = Uuid::parse_str(&id_str)
        .map_err(|e| AllocationError::Invariant(format!("invalid port_id '{id_str}': {e}")))?;

    let state_str: String = r.get("state");
    let state = PortState::from_str(&state_str).map_err(AllocationError::Invariant)?;

    let sub: Option<String> = r.get("assigned_subscription_id");
    let cust: Option<String> = r.get("assigned_customer_id");
    let at: Option<i64> = r.get("assigned_at_ms");

    let assignment = match (sub, cust, at) {
        (None, None, None) => None,
        (Some(s), Some(c), Some(t)) => Some(Assignment {
            subscription_id: parse_uuid_field("assigned_subscription_id", &s)?,
            customer_id: parse_uuid_field("assigned_customer_id", &c)?,
            assigned_at_ms: i64_to_u64(t)?,
        }),
        _ => {
            return Err(AllocationError::Invariant(format!(
                "port {port_id} has partially-set assignment fields"
            )));
        }
    };

    Port::from_parts(
        port_id,
        r.get::<String, _>("url"),
        r.get::<Option<String>, _>("note"),
        state,
        assignment,
        i64_to_u64(r.get("created_at_ms"))?,
    )
}

pub(crate) fn parse_uuid_field(field: &str, raw: &str) -> Result<Uuid, AllocationError> {
    Uuid::parse_str(raw)
        .map_err(|e| AllocationError::Invariant(format!("invalid {field} '{raw}': {e}")))
}

fn map_unique_violation(url: &str, e: sqlx::Error) -> AllocationError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.kind(), ErrorKind::UniqueViolation) {
            return AllocationError::DuplicateUrl(url.to_string());
        }
    }
    AllocationError::Persistence(e)
}
