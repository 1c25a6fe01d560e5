use anyhow::{Context, Result};
use lbmatch_domain::LBTransaction;
use tokio_postgres::GenericClient;

/// Idempotent ingestion (§4.3, §9). The unique constraint on
/// `(created_at, direction, amount, description)` makes a duplicate fetch a
/// no-op; `ON CONFLICT DO NOTHING RETURNING *` can't distinguish "inserted"
/// from "already present" when it returns no rows for either reason, so this
/// checks the affected row count explicitly instead.
pub async fn insert_if_new<C: GenericClient>(client: &C, tx: &LBTransaction) -> Result<bool> {
    let affected = client
        .execute(
            "INSERT INTO lb_transactions (created_at, direction, amount, description, btc_tx_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (created_at, direction, amount, description) DO NOTHING",
            &[
                &tx.created_at,
                &tx.direction.as_str(),
                &tx.amount,
                &tx.description,
                &tx.btc_tx_id,
            ],
        )
        .await
        .context("insert_if_new")?;
    Ok(affected == 1)
}
