use anyhow::{Context, Result};
use bb8_postgres::bb8;
use bb8_postgres::bb8::PooledConnection as Bb8PooledConnection;
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::NoTls;

/// Connection pool handed to every repository/transaction helper. Raw
/// `tokio-postgres` (not an ORM) is used deliberately: the manager needs
/// hand-written `SELECT ... FOR UPDATE` statements with an explicit lock
/// order, which a query-builder would only get in the way of.
pub type PgPool = bb8::Pool<PostgresConnectionManager<NoTls>>;
pub type PooledConnection<'a> = Bb8PooledConnection<'a, PostgresConnectionManager<NoTls>>;

pub async fn create_pool(database_url: &str, max_size: u32) -> Result<PgPool> {
    let manager = PostgresConnectionManager::new_from_stringlike(database_url, NoTls)
        .context("invalid database url")?;
    bb8::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .await
        .context("failed to build postgres connection pool")
}
