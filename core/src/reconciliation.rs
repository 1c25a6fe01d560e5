//! Deposit reconciliation loop (§4.3): polls the platform's own marketplace
//! wallet for its sent/received history and idempotently folds incoming
//! `DEPO.<base36 operator id>` transactions into operator deposits. Grounded
//! on the teacher's idiom for a standalone polling background service: its
//! own async task, one DB write per item, registered as a [`Service`].

use std::sync::Arc;

use anyhow::{Context, Result};
use lbmatch_domain::transaction::parse_deposit_operator_id;
use lbmatch_domain::{LBTransaction, OperatorId, OperatorStatus, TransactionDirection};
use lbmatch_external_marketplace::dto::{Credential, WalletDirection};
use lbmatch_external_marketplace::Marketplace;
use lbmatch_storage::postgres_db::{operators, transactions};
use lbmatch_storage::PgPool;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::engine::Service;
use crate::manager::ManagerHandle;
use crate::rpc::event_bus::EventBus;
use crate::settings::{DepositReconciliationSettings, WalletSettings};

pub struct ReconciliationService {
    finished_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl Service for ReconciliationService {
    fn name(&self) -> &str {
        "DepositReconciliationLoop"
    }

    fn graceful_shutdown(self: Arc<Self>) -> Option<oneshot::Receiver<Result<()>>> {
        self.finished_rx.lock().take()
    }
}

pub fn spawn(
    db_pool: PgPool,
    marketplace: Arc<dyn Marketplace>,
    manager: ManagerHandle,
    event_bus: Arc<dyn EventBus>,
    wallet: WalletSettings,
    settings: DepositReconciliationSettings,
    stop_token: lbmatch_utils::cancellation_token::CancellationToken,
) -> Arc<ReconciliationService> {
    let credential = Credential {
        public_key: wallet.public_key,
        secret_key: wallet.secret_key,
    };
    let period = std::time::Duration::from_secs(settings.interval_secs);

    let (finished_tx, finished_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            // checked between ticks only, never mid-transaction (§5)
            if stop_token.is_cancellation_requested() {
                break;
            }
            if let Err(err) = run_once(
                &db_pool,
                marketplace.as_ref(),
                &manager,
                event_bus.as_ref(),
                &credential,
            )
            .await
            {
                log::error!("deposit reconciliation tick failed, will retry next tick: {err:#}");
            }
        }
        let _ = finished_tx.send(Ok(()));
    });

    Arc::new(ReconciliationService {
        finished_rx: Mutex::new(Some(finished_rx)),
    })
}

async fn run_once(
    db_pool: &PgPool,
    marketplace: &dyn Marketplace,
    manager: &ManagerHandle,
    event_bus: &dyn EventBus,
    credential: &Credential,
) -> Result<()> {
    let wallet_transactions = marketplace
        .list_wallet_transactions(credential)
        .await
        .context("list_wallet_transactions")?;

    for wallet_tx in wallet_transactions {
        // Every transaction is ingested for the idempotent 30-day ledger
        // (§4.3); only `Received` rows credit a deposit and nudge the
        // manager, the deposit-crediting side-effect stays one-directional.
        let direction = match wallet_tx.direction {
            WalletDirection::Received => TransactionDirection::To,
            WalletDirection::Sent => TransactionDirection::From,
        };

        let tx = LBTransaction {
            created_at: wallet_tx.created_at,
            direction,
            amount: wallet_tx.amount,
            description: wallet_tx.description,
            btc_tx_id: wallet_tx.btc_tx_id,
        };

        if let Err(err) = ingest(db_pool, manager, event_bus, &tx).await {
            log::error!("failed to ingest deposit transaction, will retry next tick: {err:#}");
        }
    }

    Ok(())
}

async fn ingest(
    db_pool: &PgPool,
    manager: &ManagerHandle,
    event_bus: &dyn EventBus,
    tx: &LBTransaction,
) -> Result<()> {
    let mut conn = db_pool.get().await.context("ingest: acquire connection")?;
    let db_tx = conn.transaction().await.context("ingest: begin")?;

    let inserted = transactions::insert_if_new(&db_tx, tx)
        .await
        .context("ingest: insert_if_new")?;
    if !inserted {
        db_tx.commit().await.context("ingest: commit (duplicate)")?;
        return Ok(());
    }

    let mut credited: Option<(OperatorId, bool, Option<String>)> = None;

    if tx.direction == TransactionDirection::To {
        let operator_id = parse_deposit_operator_id(&tx.description).map(OperatorId);
        if let Some(operator_id) = operator_id {
            if let Some(operator) = operators::lock_by_id(&db_tx, operator_id).await? {
                operators::credit_deposit(&db_tx, operator_id, tx.amount).await?;
                credited = Some((
                    operator_id,
                    operator.status == OperatorStatus::Ready,
                    operator.chat_id,
                ));
            }
        }
    }

    db_tx.commit().await.context("ingest: commit")?;

    if let Some((operator_id, was_ready, chat_id)) = credited {
        if let Some(chat_id) = chat_id {
            event_bus.notify(chat_id, format!("deposit of {} BTC credited", tx.amount));
        }
        if was_ready {
            manager.push_operator(operator_id, true).await;
        }
    }

    Ok(())
}
