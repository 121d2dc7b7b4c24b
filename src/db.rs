use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::admin::PRIMARY_ADMIN;
use crate::auth;

pub async fn connect() -> Result<SqlitePool, sqlx::Error> {
    let db_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data.db?mode=rwc".to_string());

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Provisions the default "admin"/"admin" account on first run.
pub async fn ensure_admin(pool: &SqlitePool) -> anyhow::Result<()> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM user WHERE username = ?")
        .bind(PRIMARY_ADMIN)
        .fetch_optional(pool)
        .await?;
    if existing.is_none() {
        let hash = auth::hash_password("admin").map_err(|e| anyhow::anyhow!("hash error: {e}"))?;
        sqlx::query("INSERT INTO user (username, password_hash, is_admin) VALUES (?, ?, 1)")
            .bind(PRIMARY_ADMIN)
            .bind(hash)
            .execute(pool)
            .await?;
        tracing::info!("provisioned default admin account");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

#[cfg(test)]
pub(crate) async fn test_user(pool: &SqlitePool, username: &str, is_admin: bool) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO user (username, password_hash, is_admin) VALUES (?, 'x', ?) RETURNING id",
    )
    .bind(username)
    .bind(is_admin)
    .fetch_one(pool)
    .await
    .expect("insert test user")
}
