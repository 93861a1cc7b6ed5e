use anyhow::Context;

// Advisory locks are scoped to the Postgres session, so the lock must be taken and
// released on the same pooled connection.
const RECOMPUTE_LOCK_KEY: i64 = 0x4149_4D53_5243; // "AIMSRC"

pub async fn try_acquire_recompute_lock(
    conn: &mut sqlx::PgConnection,
) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(RECOMPUTE_LOCK_KEY)
        .fetch_one(conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={RECOMPUTE_LOCK_KEY})"))?;
    Ok(acquired.0)
}

pub async fn release_recompute_lock(conn: &mut sqlx::PgConnection) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(RECOMPUTE_LOCK_KEY)
        .execute(conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={RECOMPUTE_LOCK_KEY})"))?;
    Ok(())
}
