use anyhow::Context;

pub mod corpus;
pub mod lock;
pub mod metrics;
pub mod reports;
pub mod stocks;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
