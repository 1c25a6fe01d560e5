use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lbmatch_domain::{Order, OrderId, OrderStatus, OperatorId};
use rust_decimal::Decimal;
use tokio_postgres::{GenericClient, Row};

fn from_row(row: &Row) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let lb_contact_id: i64 = row.try_get("lb_contact_id")?;
    let operator_id: i64 = row.try_get("operator_id")?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        client_name: row.try_get("client_name")?,
        destination_address: row.try_get("destination_address")?,
        payment_method: row.try_get("payment_method")?,
        currency: row.try_get("currency")?,
        fiat_amount: row.try_get("fiat_amount")?,
        lb_amount: row.try_get("lb_amount")?,
        lb_contact_id: (lb_contact_id != 0).then_some(lb_contact_id),
        lb_fee: row.try_get("lb_fee")?,
        operator_fee: row.try_get("operator_fee")?,
        bot_fee: row.try_get("bot_fee")?,
        requisites: row.try_get("requisites")?,
        operator_id: (operator_id != 0).then_some(OperatorId(operator_id)),
        status: OrderStatus::from_str(&status).context("corrupt order status in db")?,
        payment_requested_at: row.try_get("payment_requested_at")?,
        marked_payed_at: row.try_get("marked_payed_at")?,
    })
}

/// Canonical lock order (§4.1): orders are always locked before operators.
pub async fn lock_by_id<C: GenericClient>(client: &C, id: OrderId) -> Result<Option<Order>> {
    let row = client
        .query_opt("SELECT * FROM orders WHERE id = $1 FOR UPDATE", &[&id.0])
        .await
        .context("lock_by_id")?;
    row.as_ref().map(from_row).transpose()
}

pub async fn get_by_id<C: GenericClient>(client: &C, id: OrderId) -> Result<Option<Order>> {
    let row = client
        .query_opt("SELECT * FROM orders WHERE id = $1", &[&id.0])
        .await
        .context("get_by_id")?;
    row.as_ref().map(from_row).transpose()
}

/// §4.1.a: every `New` order not yet offered to this operator, ascending id.
pub async fn lock_new_above<C: GenericClient>(
    client: &C,
    above: OrderId,
) -> Result<Vec<Order>> {
    let rows = client
        .query(
            "SELECT * FROM orders WHERE status = 'new' AND id > $1 ORDER BY id FOR UPDATE",
            &[&above.0],
        )
        .await
        .context("lock_new_above")?;
    rows.iter().map(from_row).collect()
}

pub async fn lock_all_new<C: GenericClient>(client: &C) -> Result<Vec<Order>> {
    let rows = client
        .query("SELECT * FROM orders WHERE status = 'new' ORDER BY id FOR UPDATE", &[])
        .await
        .context("lock_all_new")?;
    rows.iter().map(from_row).collect()
}

#[allow(clippy::too_many_arguments)]
pub async fn insert<C: GenericClient>(
    client: &C,
    client_name: &str,
    destination_address: &str,
    payment_method: &str,
    currency: &str,
    fiat_amount: Decimal,
    lb_amount: Decimal,
) -> Result<Order> {
    let row = client
        .query_one(
            "INSERT INTO orders \
             (client_name, destination_address, payment_method, currency, fiat_amount, lb_amount) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
            &[
                &client_name,
                &destination_address,
                &payment_method,
                &currency,
                &fiat_amount,
                &lb_amount,
            ],
        )
        .await
        .context("insert order")?;
    from_row(&row)
}

pub async fn set_status<C: GenericClient>(
    client: &C,
    id: OrderId,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1",
            &[&id.0, &status.as_str(), &now],
        )
        .await
        .context("set_status")?;
    Ok(())
}

/// §4.1.c: assign the winning operator and move `New -> Accepted`.
pub async fn assign_operator<C: GenericClient>(
    client: &C,
    id: OrderId,
    operator: OperatorId,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET operator_id = $2, status = 'accepted', updated_at = $3 \
             WHERE id = $1",
            &[&id.0, &operator.0, &now],
        )
        .await
        .context("assign_operator")?;
    Ok(())
}

/// §4.1.d: `Accepted -> Linked`, recording the marketplace contact id and
/// the requisites handed to the customer.
pub async fn link_contact<C: GenericClient>(
    client: &C,
    id: OrderId,
    lb_contact_id: i64,
    requisites: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET lb_contact_id = $2, requisites = $3, status = 'linked', \
             updated_at = $4 WHERE id = $1",
            &[&id.0, &lb_contact_id, &requisites, &now],
        )
        .await
        .context("link_contact")?;
    Ok(())
}

/// `Linked -> Payment`, stamping the request time used by the timeout clock (§4.2).
pub async fn request_payment<C: GenericClient>(
    client: &C,
    id: OrderId,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET status = 'payment', payment_requested_at = $2, updated_at = $2 \
             WHERE id = $1",
            &[&id.0, &now],
        )
        .await
        .context("request_payment")?;
    Ok(())
}

/// `Payment -> Confirmation`, stamping the marked-payed time used by the
/// confirmation timeout clock (§4.2).
pub async fn mark_payed<C: GenericClient>(
    client: &C,
    id: OrderId,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET status = 'confirmation', marked_payed_at = $2, updated_at = $2 \
             WHERE id = $1",
            &[&id.0, &now],
        )
        .await
        .context("mark_payed")?;
    Ok(())
}

/// §4.2: the atomic debit + `Confirmation|ConfirmationExtended -> Transfer` step.
/// Caller is expected to have already locked both the order and its operator
/// row in this same transaction.
pub async fn confirm_and_transfer<C: GenericClient>(
    client: &C,
    id: OrderId,
    operator: OperatorId,
    lb_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET status = 'transfer', updated_at = $2 WHERE id = $1",
            &[&id.0, &now],
        )
        .await
        .context("confirm_and_transfer: order")?;
    super::operators::debit_deposit(client, operator, lb_amount)
        .await
        .context("confirm_and_transfer: debit")?;
    Ok(())
}

pub async fn finish<C: GenericClient>(client: &C, id: OrderId, now: DateTime<Utc>) -> Result<()> {
    client
        .execute(
            "UPDATE orders SET status = 'finished', updated_at = $2 WHERE id = $1",
            &[&id.0, &now],
        )
        .await
        .context("finish")?;
    Ok(())
}

/// §4.2: orders stuck in `Payment` or `Confirmation`/`ConfirmationExtended`
/// past their clock, used by the manager's `tickUpdate` sweep.
pub async fn lock_timed_out(
    client: &impl GenericClient,
    payment_cutoff: DateTime<Utc>,
    confirmation_cutoff: DateTime<Utc>,
) -> Result<Vec<Order>> {
    let rows = client
        .query(
            "SELECT * FROM orders WHERE \
             (status = 'payment' AND payment_requested_at < $1) \
             OR (status IN ('confirmation', 'confirmation_extended') AND marked_payed_at < $2) \
             ORDER BY id FOR UPDATE",
            &[&payment_cutoff, &confirmation_cutoff],
        )
        .await
        .context("lock_timed_out")?;
    rows.iter().map(from_row).collect()
}
