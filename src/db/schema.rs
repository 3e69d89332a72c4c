use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Ports
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ports (
  port_id TEXT PRIMARY KEY,
  url TEXT NOT NULL UNIQUE,
  note TEXT,
  state TEXT NOT NULL,
  assigned_subscription_id TEXT,
  assigned_customer_id TEXT,
  assigned_at_ms BIGINT,
  created_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Subscriptions
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS subscriptions (
  subscription_id TEXT PRIMARY KEY,
  customer_id TEXT NOT NULL,
  plan_id TEXT NOT NULL,
  order_id TEXT,
  status TEXT NOT NULL,
  port_id TEXT,
  created_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Allocation log (append-only)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS allocation_log (
  entry_id TEXT PRIMARY KEY,
  port_id TEXT NOT NULL,
  subscription_id TEXT,
  customer_id TEXT,
  action TEXT NOT NULL,
  performed_by TEXT,
  at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_ports_state ON ports(state);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_allocation_log_port ON allocation_log(port_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
