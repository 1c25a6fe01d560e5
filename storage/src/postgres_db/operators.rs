use std::str::FromStr;

use anyhow::{Context, Result};
use lbmatch_domain::{Operator, OperatorId, OperatorStatus, OrderId};
use tokio_postgres::{GenericClient, Row};

fn from_row(row: &Row) -> Result<Operator> {
    let status: String = row.try_get("status")?;
    let current_order: i64 = row.try_get("current_order")?;

    Ok(Operator {
        id: OperatorId(row.try_get("id")?),
        username: row.try_get("username")?,
        chat_id: row.try_get("telegram_chat")?,
        api_key: row.try_get("api_key")?,
        api_secret: row.try_get("api_secret")?,
        status: OperatorStatus::from_str(&status).context("corrupt operator status in db")?,
        deposit: row.try_get("deposit")?,
        current_order: (current_order != 0).then_some(OrderId(current_order)),
        note: row.try_get("note")?,
    })
}

/// `SELECT ... FOR UPDATE` a single operator row. Callers hold a transaction
/// handle; this never starts or commits one itself (§4.1's canonical lock
/// order: Orders ascending id, then Operators ascending id — always lock
/// the order first when both are needed in the same command).
pub async fn lock_by_id<C: GenericClient>(client: &C, id: OperatorId) -> Result<Option<Operator>> {
    let row = client
        .query_opt("SELECT * FROM operators WHERE id = $1 FOR UPDATE", &[&id.0])
        .await
        .context("lock_by_id")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_id<C: GenericClient>(client: &C, id: OperatorId) -> Result<Option<Operator>> {
    let row = client
        .query_opt("SELECT * FROM operators WHERE id = $1", &[&id.0])
        .await
        .context("get_by_id")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_username<C: GenericClient>(
    client: &C,
    username: &str,
) -> Result<Option<Operator>> {
    let row = client
        .query_opt("SELECT * FROM operators WHERE username = $1", &[&username])
        .await
        .context("get_by_username")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn lock_by_username<C: GenericClient>(
    client: &C,
    username: &str,
) -> Result<Option<Operator>> {
    let row = client
        .query_opt(
            "SELECT * FROM operators WHERE username = $1 FOR UPDATE",
            &[&username],
        )
        .await
        .context("lock_by_username")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_chat<C: GenericClient>(client: &C, chat_id: &str) -> Result<Option<Operator>> {
    let row = client
        .query_opt(
            "SELECT * FROM operators WHERE telegram_chat = $1",
            &[&chat_id],
        )
        .await
        .context("get_by_chat")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn lock_by_chat<C: GenericClient>(client: &C, chat_id: &str) -> Result<Option<Operator>> {
    let row = client
        .query_opt(
            "SELECT * FROM operators WHERE telegram_chat = $1 FOR UPDATE",
            &[&chat_id],
        )
        .await
        .context("lock_by_chat")?;
    row.as_ref().map(from_row).transpose()
}

/// §4.1.a: all `Ready` operators not yet pinged for an order older than `order_id`,
/// locked in ascending-id order.
pub async fn lock_ready_below_order<C: GenericClient>(
    client: &C,
    order_id: OrderId,
) -> Result<Vec<Operator>> {
    let rows = client
        .query(
            "SELECT * FROM operators WHERE status = 'ready' AND current_order < $1 \
             ORDER BY id FOR UPDATE",
            &[&order_id.0],
        )
        .await
        .context("lock_ready_below_order")?;
    rows.iter().map(from_row).collect()
}

/// §4.1.c: every other operator still holding a `Proposal` on this order, locked
/// in ascending-id order, excluding the winner.
pub async fn lock_other_proposal_holders<C: GenericClient>(
    client: &C,
    order_id: OrderId,
    winner: OperatorId,
) -> Result<Vec<Operator>> {
    let rows = client
        .query(
            "SELECT * FROM operators WHERE status = 'proposal' AND current_order = $1 \
             AND id <> $2 ORDER BY id FOR UPDATE",
            &[&order_id.0, &winner.0],
        )
        .await
        .context("lock_other_proposal_holders")?;
    rows.iter().map(from_row).collect()
}

pub async fn insert<C: GenericClient>(client: &C, username: &str, chat_id: &str) -> Result<Operator> {
    let row = client
        .query_one(
            "INSERT INTO operators (username, telegram_chat, status) VALUES ($1, $2, 'none') \
             RETURNING *",
            &[&username, &chat_id],
        )
        .await
        .context("insert operator")?;
    from_row(&row)
}

pub async fn set_credential<C: GenericClient>(
    client: &C,
    id: OperatorId,
    api_key: &str,
    api_secret: &str,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET api_key = $2, api_secret = $3, status = 'inactive' \
             WHERE id = $1",
            &[&id.0, &api_key, &api_secret],
        )
        .await
        .context("set_credential")?;
    Ok(())
}

/// §4.5: rebind an existing operator row to a new chat, leaving its status
/// and deposit untouched (the caller sets credentials/status separately).
pub async fn set_chat<C: GenericClient>(client: &C, id: OperatorId, chat_id: &str) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET telegram_chat = $2 WHERE id = $1",
            &[&id.0, &chat_id],
        )
        .await
        .context("set_chat")?;
    Ok(())
}

pub async fn detach_chat<C: GenericClient>(client: &C, id: OperatorId) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET telegram_chat = NULL, status = 'none' WHERE id = $1",
            &[&id.0],
        )
        .await
        .context("detach_chat")?;
    Ok(())
}

pub async fn set_status<C: GenericClient>(
    client: &C,
    id: OperatorId,
    status: OperatorStatus,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET status = $2 WHERE id = $1",
            &[&id.0, &status.as_str()],
        )
        .await
        .context("set_status")?;
    Ok(())
}

/// §4.1.a/b: mark an operator as holding a (possibly new) offer.
pub async fn set_offer<C: GenericClient>(
    client: &C,
    id: OperatorId,
    order_id: OrderId,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET status = 'proposal', current_order = $2 WHERE id = $1",
            &[&id.0, &order_id.0],
        )
        .await
        .context("set_offer")?;
    Ok(())
}

/// §4.1.a: record that an operator was pinged for (and skipped) an order too
/// large for its deposit, without changing its status.
pub async fn set_current_order_only<C: GenericClient>(
    client: &C,
    id: OperatorId,
    order_id: OrderId,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET current_order = $2 WHERE id = $1",
            &[&id.0, &order_id.0],
        )
        .await
        .context("set_current_order_only")?;
    Ok(())
}

/// §4.1.c: winner of the race.
pub async fn set_busy<C: GenericClient>(client: &C, id: OperatorId, order_id: OrderId) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET status = 'busy', current_order = $2 WHERE id = $1",
            &[&id.0, &order_id.0],
        )
        .await
        .context("set_busy")?;
    Ok(())
}

/// Release an operator back to `Ready` with no current order (timeouts, lost races).
pub async fn release_to_ready<C: GenericClient>(client: &C, id: OperatorId) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET status = 'ready', current_order = 0 WHERE id = $1",
            &[&id.0],
        )
        .await
        .context("release_to_ready")?;
    Ok(())
}

/// Relative deposit update (§4.3, §9: never read-modify-write).
pub async fn credit_deposit<C: GenericClient>(
    client: &C,
    id: OperatorId,
    amount: rust_decimal::Decimal,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET deposit = deposit + $2 WHERE id = $1",
            &[&id.0, &amount],
        )
        .await
        .context("credit_deposit")?;
    Ok(())
}

/// §4.2: debit on `Confirmation -> Transfer`. Caller has already validated
/// `deposit - amount >= 0`; the invariant `deposit >= 0` is enforced outside
/// the transaction only (§3), so this may transiently go negative mid-tx.
pub async fn debit_deposit<C: GenericClient>(
    client: &C,
    id: OperatorId,
    amount: rust_decimal::Decimal,
) -> Result<()> {
    client
        .execute(
            "UPDATE operators SET deposit = deposit - $2 WHERE id = $1",
            &[&id.0, &amount],
        )
        .await
        .context("debit_deposit")?;
    Ok(())
}
