use anyhow::Context;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use itertools::Itertools;
use sqlx::error::BoxDynError;
use sqlx::migrate::{Migration, MigrationSource, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::path::PathBuf;

#[derive(Debug)]
struct MigrationSources {
    migration_sources: Vec<PathBuf>,
}

impl<'s> MigrationSource<'s> for MigrationSources {
    fn resolve(self) -> BoxFuture<'s, Result<Vec<Migration>, BoxDynError>> {
        async move {
            let mut migrations: Vec<_> =
                join_all(self.migration_sources.iter().map(|p| async move {
                    let path = p.as_path();
                    let res = path.resolve().await;
                    res.map_err(|err| {
                        let path = path.to_string_lossy();
                        format!("failed resolving migrations by path: '{path} . {err}'")
                    })
                }))
                .await
                .into_iter()
                .flatten_ok()
                .try_collect()?;

            migrations.sort_by_key(|i| i.version);
            Ok(migrations)
        }
        .boxed()
    }
}

/// Run migrations from the list of configured sources (§9 ambient config:
/// `DbSettings.migrations`). The operator/order/lb_transaction schema itself
/// lives at `postgres_db/migrations/0001_init.sql`.
pub async fn apply_migrations(
    database_url: &str,
    migration_sources: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let migrator = Migrator::new(MigrationSources { migration_sources }).await?;
    let connection_pool = create_connection_pool(database_url, 2).await?;
    migrator.run(&connection_pool).await?;
    Ok(())
}

async fn create_connection_pool(
    database_url: &str,
    max_connections: u32,
) -> anyhow::Result<Pool<Postgres>> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Unable to connect to DB")
}

#[cfg(test)]
mod tests {
    use super::apply_migrations;
    use crate::postgres_db::tests::get_database_url;
    use ntest::timeout;
    use std::path::PathBuf;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[timeout(20_000)]
    #[ignore = "need postgres initialized for tests"]
    async fn applies_init_migration() {
        let sql_dir: PathBuf = concat!(env!("CARGO_MANIFEST_DIR"), "/src/postgres_db/migrations").into();

        apply_migrations(&get_database_url(), vec![sql_dir])
            .await
            .expect("failed apply_migrations in test");
    }
}
