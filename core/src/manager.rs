//! The OrderManager (§4.1): a single-writer worker that serialises every
//! matchmaking decision over a command channel so no two commands ever race
//! on the same `(operator, order)` pairing. Each command runs inside its own
//! DB transaction, locking Orders before Operators (always ascending id),
//! and publishes events only after commit.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use itertools::Itertools;
use lbmatch_domain::{DomainError, OperatorId, OperatorStatus, Order, OrderId, OrderStatus};
use lbmatch_storage::postgres_db::{operators, orders};
use lbmatch_storage::PgPool;
use lbmatch_utils::cancellation_token::CancellationToken;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::lifecycle::engine::Service;
use crate::rpc::event_bus::EventBus;
use crate::settings::OrderTimeouts;

#[derive(Debug)]
enum ManagerCommand {
    PushOrder {
        order_id: OrderId,
        notify: bool,
    },
    PushOperator {
        operator_id: OperatorId,
        anew: bool,
    },
    AcceptOffer {
        operator_id: OperatorId,
        order_id: OrderId,
        reply: oneshot::Sender<Result<Order, DomainError>>,
    },
    Tick,
}

/// Cheap-to-clone front door to the manager's command channel. RPC handlers,
/// the reconciliation loop and the periodic ticker all go through this.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
    accept_timeout: StdDuration,
}

impl ManagerHandle {
    /// Bounded, non-blocking enqueue (§5): a full channel drops the command
    /// rather than blocking the caller — the next push or tick reconciles.
    async fn send(&self, command: ManagerCommand) {
        if tokio::time::timeout(self.accept_timeout, self.tx.send(command))
            .await
            .is_err()
        {
            log::warn!("manager command queue did not accept command within accept timeout, dropping");
        }
    }

    pub async fn push_order(&self, order_id: OrderId, notify: bool) {
        self.send(ManagerCommand::PushOrder { order_id, notify }).await;
    }

    pub async fn push_operator(&self, operator_id: OperatorId, anew: bool) {
        self.send(ManagerCommand::PushOperator { operator_id, anew })
            .await;
    }

    pub async fn accept_offer(
        &self,
        operator_id: OperatorId,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(ManagerCommand::AcceptOffer {
            operator_id,
            order_id,
            reply,
        })
        .await;

        match tokio::time::timeout(self.accept_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(DomainError::ServiceUnavailable),
        }
    }

    pub async fn tick(&self) {
        self.send(ManagerCommand::Tick).await;
    }
}

pub struct ManagerService {
    finished_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl Service for ManagerService {
    fn name(&self) -> &str {
        "OrderManager"
    }

    fn graceful_shutdown(self: Arc<Self>) -> Option<oneshot::Receiver<Result<()>>> {
        self.finished_rx.lock().take()
    }
}

struct OrderManager {
    db_pool: PgPool,
    event_bus: Arc<dyn EventBus>,
    timeouts: OrderTimeouts,
}

/// Spawns the manager's worker task plus its own periodic ticker, and
/// returns the handle other components enqueue commands through and the
/// [`Service`] that wires it into graceful shutdown.
pub fn spawn(
    db_pool: PgPool,
    event_bus: Arc<dyn EventBus>,
    timeouts: OrderTimeouts,
    stop_token: CancellationToken,
) -> (ManagerHandle, Arc<ManagerService>) {
    let (tx, rx) = mpsc::channel(256);
    let accept_timeout = StdDuration::from_secs(timeouts.accept_secs);
    let sweep_period = StdDuration::from_secs(timeouts.sweep_interval_secs);

    let manager = OrderManager {
        db_pool,
        event_bus,
        timeouts,
    };

    let (finished_tx, finished_rx) = oneshot::channel();
    let run_stop_token = stop_token.clone();
    tokio::spawn(async move {
        manager.run(rx, run_stop_token).await;
        let _ = finished_tx.send(Ok(()));
    });

    {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if stop_token.is_cancellation_requested() {
                    break;
                }
                if tx.send(ManagerCommand::Tick).await.is_err() {
                    break;
                }
            }
        });
    }

    let handle = ManagerHandle { tx, accept_timeout };
    let service = Arc::new(ManagerService {
        finished_rx: Mutex::new(Some(finished_rx)),
    });

    (handle, service)
}

impl OrderManager {
    async fn run(&self, mut rx: mpsc::Receiver<ManagerCommand>, stop_token: CancellationToken) {
        loop {
            // checked between command boundaries only, never mid-transaction (§5)
            if stop_token.is_cancellation_requested() {
                break;
            }

            let command = match rx.recv().await {
                Some(command) => command,
                None => break,
            };

            if let Err(err) = self.handle(command).await {
                log::error!("manager command failed, will be reconciled by a future push/tick: {err:#}");
            }
        }
    }

    async fn handle(&self, command: ManagerCommand) -> Result<()> {
        match command {
            ManagerCommand::PushOrder { order_id, notify } => {
                self.on_order_receive(order_id, notify).await
            }
            ManagerCommand::PushOperator { operator_id, anew } => {
                self.on_operator_receive(operator_id, anew).await
            }
            ManagerCommand::AcceptOffer {
                operator_id,
                order_id,
                reply,
            } => {
                let result = self.accept_order(operator_id, order_id).await;
                let _ = reply.send(result);
                Ok(())
            }
            ManagerCommand::Tick => self.tick_update().await,
        }
    }

    /// §4.1.a
    async fn on_order_receive(&self, order_id: OrderId, notify: bool) -> Result<()> {
        let mut conn = self.db_pool.get().await.context("on_order_receive: acquire connection")?;
        let tx = conn.transaction().await.context("on_order_receive: begin")?;

        let order = match orders::lock_by_id(&tx, order_id).await? {
            Some(order) if order.status == OrderStatus::New => order,
            _ => return Ok(()),
        };

        let candidates = operators::lock_ready_below_order(&tx, order_id).await?;
        let (offer, lack): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|operator| operator.can_cover(order.lb_amount));

        for operator in &offer {
            operators::set_offer(&tx, operator.id, order_id).await?;
        }
        for operator in &lack {
            operators::set_current_order_only(&tx, operator.id, order_id).await?;
        }

        let offer_chats: Vec<String> = offer.iter().filter_map(|o| o.chat_id.clone()).collect();

        tx.commit().await.context("on_order_receive: commit")?;

        if offer.is_empty() {
            self.requeue_push_order(order_id);
            if notify {
                for operator in &lack {
                    self.notify_lack_of_deposit(operator.chat_id.clone());
                }
            }
        } else {
            self.event_bus.publish_offer(offer_chats, order);
        }

        Ok(())
    }

    /// §4.1.b
    async fn on_operator_receive(&self, operator_id: OperatorId, anew: bool) -> Result<()> {
        let mut conn = self.db_pool.get().await.context("on_operator_receive: acquire connection")?;
        let tx = conn.transaction().await.context("on_operator_receive: begin")?;

        let operator = match operators::lock_by_id(&tx, operator_id).await? {
            Some(operator) => operator,
            None => return Ok(()),
        };

        let above = if anew {
            OrderId(0)
        } else {
            operator.current_order.unwrap_or(OrderId(0))
        };
        let candidates = orders::lock_new_above(&tx, above).await?;

        let mut offered: Option<Order> = None;
        let mut skipped_for_deposit = Vec::new();
        let mut last_scanned = above;

        for order in candidates {
            last_scanned = order.id;
            if order.lb_amount <= operator.deposit {
                operators::set_offer(&tx, operator.id, order.id).await?;
                offered = Some(order);
                break;
            }
            skipped_for_deposit.push(order.id);
        }

        match &offered {
            Some(_) => {}
            None => {
                operators::set_current_order_only(&tx, operator.id, last_scanned).await?;
            }
        }

        tx.commit().await.context("on_operator_receive: commit")?;

        if let Some(order) = offered {
            let chat = operator.chat_id.clone();
            if let Some(chat) = chat {
                self.event_bus.publish_offer(vec![chat], order);
            }
        }
        if !skipped_for_deposit.is_empty() {
            self.notify_lack_of_deposit(operator.chat_id.clone());
        }

        Ok(())
    }

    /// §4.1.c
    async fn accept_order(
        &self,
        operator_id: OperatorId,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let mut conn = self
            .db_pool
            .get()
            .await
            .map_err(|err| {
                log::error!("accept_order: acquire connection failed: {err:#}");
                DomainError::Db
            })?;
        let tx = conn.transaction().await.map_err(|err| {
            log::error!("accept_order: begin failed: {err:#}");
            DomainError::Db
        })?;

        let order = orders::lock_by_id(&tx, order_id)
            .await
            .map_err(|_| DomainError::Db)?
            .ok_or(DomainError::OrderUnavailable)?;
        let operator = operators::lock_by_id(&tx, operator_id)
            .await
            .map_err(|_| DomainError::Db)?
            .ok_or(DomainError::UnknownOperator)?;

        if order.status != OrderStatus::New
            || operator.status != OperatorStatus::Proposal
            || operator.current_order != Some(order_id)
        {
            return Err(DomainError::UnexpectedStatus);
        }
        if !operator.can_cover(order.lb_amount) {
            return Err(DomainError::LackOfDeposit);
        }

        operators::set_busy(&tx, operator.id, order_id)
            .await
            .map_err(|_| DomainError::Db)?;

        let losers = operators::lock_other_proposal_holders(&tx, order_id, operator.id)
            .await
            .map_err(|_| DomainError::Db)?;
        for loser in &losers {
            operators::release_to_ready(&tx, loser.id)
                .await
                .map_err(|_| DomainError::Db)?;
        }

        let now = Utc::now();
        orders::assign_operator(&tx, order_id, operator.id, now)
            .await
            .map_err(|_| DomainError::Db)?;

        let mut updated_order = order;
        updated_order.status = OrderStatus::Accepted;
        updated_order.operator_id = Some(operator.id);
        updated_order.updated_at = now;

        tx.commit().await.map_err(|err| {
            log::error!("accept_order: commit failed: {err:#}");
            DomainError::Db
        })?;

        let loser_chats: Vec<String> = losers.iter().filter_map(|o| o.chat_id.clone()).collect();
        if !loser_chats.is_empty() {
            self.event_bus
                .publish_offer(loser_chats, updated_order.clone());
        }
        self.event_bus.publish_order(updated_order.clone());

        Ok(updated_order)
    }

    /// §4.1.d
    async fn tick_update(&self) -> Result<()> {
        self.reject_timed_out_new_orders().await?;
        self.sweep_payment_and_confirmation_timeouts().await
    }

    async fn reject_timed_out_new_orders(&self) -> Result<()> {
        let mut conn = self
            .db_pool
            .get()
            .await
            .context("reject_timed_out_new_orders: acquire connection")?;
        let tx = conn
            .transaction()
            .await
            .context("reject_timed_out_new_orders: begin")?;

        let cutoff = Utc::now() - Duration::seconds(self.timeouts.accept_secs as i64);
        let stale = orders::lock_all_new(&tx)
            .await?
            .into_iter()
            .filter(|order| order.created_at < cutoff)
            .collect_vec();

        let mut published = Vec::new();
        for order in stale {
            let holders = operators::lock_other_proposal_holders(&tx, order.id, OperatorId(0)).await?;
            for holder in &holders {
                operators::release_to_ready(&tx, holder.id).await?;
            }
            orders::set_status(&tx, order.id, OrderStatus::Rejected, Utc::now()).await?;

            let mut rejected = order;
            rejected.status = OrderStatus::Rejected;
            let chats: Vec<String> = holders.iter().filter_map(|o| o.chat_id.clone()).collect();
            published.push((chats, rejected));
        }

        tx.commit().await.context("reject_timed_out_new_orders: commit")?;

        for (chats, order) in published {
            if !chats.is_empty() {
                self.event_bus.publish_offer(chats, order.clone());
            }
            self.event_bus.publish_order(order);
        }

        Ok(())
    }

    async fn sweep_payment_and_confirmation_timeouts(&self) -> Result<()> {
        let mut conn = self
            .db_pool
            .get()
            .await
            .context("sweep: acquire connection")?;
        let tx = conn.transaction().await.context("sweep: begin")?;

        let payment_cutoff = Utc::now() - Duration::seconds(self.timeouts.payment_secs as i64);
        let confirmation_cutoff = Utc::now() - Duration::seconds(self.timeouts.confirm_secs as i64);
        let timed_out = orders::lock_timed_out(&tx, payment_cutoff, confirmation_cutoff).await?;

        let mut published = Vec::new();
        for order in timed_out {
            let now = Utc::now();
            match order.status {
                OrderStatus::Payment => {
                    orders::set_status(&tx, order.id, OrderStatus::Timeout, now).await?;
                    if let Some(operator_id) = order.operator_id {
                        operators::release_to_ready(&tx, operator_id).await?;
                    }
                    let mut timed_out_order = order;
                    timed_out_order.status = OrderStatus::Timeout;
                    published.push(timed_out_order);
                }
                OrderStatus::Confirmation | OrderStatus::ConfirmationExtended => {
                    orders::set_status(&tx, order.id, OrderStatus::ConfirmationExtended, now).await?;
                    let mut extended = order;
                    extended.status = OrderStatus::ConfirmationExtended;
                    published.push(extended);
                }
                _ => {}
            }
        }

        tx.commit().await.context("sweep: commit")?;

        for order in published {
            self.event_bus.publish_order(order);
        }

        Ok(())
    }

    /// Enqueues a non-notifying re-push after `OrderTimeouts.accept` (§4.1.a:
    /// "commit, requeue the push with notify=false").
    fn requeue_push_order(&self, order_id: OrderId) {
        let delay = StdDuration::from_secs(self.timeouts.accept_secs);
        let db_pool = self.db_pool.clone();
        let event_bus = self.event_bus.clone();
        let timeouts = self.timeouts.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let manager = OrderManager {
                db_pool,
                event_bus,
                timeouts,
            };
            if let Err(err) = manager.on_order_receive(order_id, false).await {
                log::error!("requeued push_order failed: {err:#}");
            }
        });
    }

    /// Best-effort notification (§4.1.a/b), fire-and-forget per §9.
    fn notify_lack_of_deposit(&self, chat_id: Option<String>) {
        if let Some(chat_id) = chat_id {
            self.event_bus
                .notify(chat_id, "lack of deposit for this order".to_string());
        }
    }
}
