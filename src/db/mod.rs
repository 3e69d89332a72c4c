pub mod schema;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::error::AllocationError;

#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }
}

/* =========================
Numeric safety helpers
========================= */

pub(crate) fn i64_to_u64(v: i64) -> Result<u64, AllocationError> {
    if v < 0 {
        return Err(AllocationError::Invariant(format!(
            "negative i64 where u64 expected: {v}"
        )));
    }
    Ok(v as u64)
}

pub(crate) fn u64_to_i64(v: u64) -> Result<i64, AllocationError> {
    if v > i64::MAX as u64 {
        return Err(AllocationError::Invariant(format!(
            "u64 too large for i64: {v}"
        )));
    }
    Ok(v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_to_u64_rejects_negative() {
        assert!(i64_to_u64(-1).is_err());
        assert_eq!(i64_to_u64(0).unwrap(), 0);
        assert_eq!(i64_to_u64(i64::MAX).unwrap(), i64::MAX as u64);
    }

    #[test]
    fn u64_to_i64_rejects_overflow() {
        assert!(u64_to_i64(u64::MAX).is_err());
        assert_eq!(u64_to_i64(i64::MAX as u64).unwrap(), i64::MAX);
    }
}
