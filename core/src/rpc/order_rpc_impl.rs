//! `OrderRpc` implementation (§6, §4.2, §4.5) bridging the synchronous
//! jsonrpc-derive trait to this crate's async manager/DB/marketplace calls.
//!
//! `jsonrpc_ipc_server` dispatches each handler on its own worker thread, not
//! the tokio reactor thread, so blocking that thread on `Handle::block_on`
//! is safe here the way it would not be inside an actual async task.

use std::sync::Arc;

use chrono::Utc;
use jsonrpc_core::Result as RpcResult;
use lbmatch_domain::{DomainError, Operator, OperatorId, OperatorStatus, Order, OrderId, OrderStatus};
use lbmatch_external_marketplace::dto::Credential;
use lbmatch_external_marketplace::Marketplace;
use lbmatch_rpc::order_rpc::{
    domain_error_to_rpc, CreateOrderRequest, DepositAddress, KeyInput, LinkLbContactRequest,
    OperatorOrderRequest, OrderRpc, SetOperatorKeyRequest, SetOperatorStatusRequest,
};
use lbmatch_storage::postgres_db::{operators, orders};
use lbmatch_storage::PgPool;
use rust_decimal::Decimal;
use tokio::runtime::Handle;

use crate::manager::ManagerHandle;
use crate::rate_cache::RateCache;
use crate::rpc::event_bus::EventBus;
use crate::settings::WalletSettings;

fn db_err(err: impl std::fmt::Display) -> DomainError {
    log::error!("order rpc: db error: {err}");
    DomainError::Db
}

pub struct OrderRpcImpl {
    db_pool: PgPool,
    marketplace: Arc<dyn Marketplace>,
    manager: ManagerHandle,
    rate_cache: Arc<RateCache>,
    event_bus: Arc<dyn EventBus>,
    wallet: WalletSettings,
    runtime: Handle,
}

impl OrderRpcImpl {
    pub fn new(
        db_pool: PgPool,
        marketplace: Arc<dyn Marketplace>,
        manager: ManagerHandle,
        rate_cache: Arc<RateCache>,
        event_bus: Arc<dyn EventBus>,
        wallet: WalletSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            db_pool,
            marketplace,
            manager,
            rate_cache,
            event_bus,
            wallet,
            runtime,
        }
    }

    /// §6 `CheckKey`: validate the credential against the marketplace and
    /// return the matching operator, or an unsaved view if none exists yet.
    async fn do_check_key(&self, key: KeyInput) -> Result<Operator, DomainError> {
        let credential = Credential {
            public_key: key.public,
            secret_key: key.secret,
        };
        let account = self.marketplace.get_account(&credential).await.map_err(|err| {
            log::warn!("check_key: credential rejected by marketplace: {err:#}");
            DomainError::InvalidKey
        })?;

        let conn = self.db_pool.get().await.map_err(db_err)?;
        if let Some(operator) = operators::get_by_username(&*conn, &account.username)
            .await
            .map_err(db_err)?
        {
            return Ok(operator);
        }

        Ok(Operator {
            id: OperatorId(0),
            username: account.username,
            chat_id: None,
            api_key: Some(credential.public_key),
            api_secret: Some(credential.secret_key),
            status: OperatorStatus::None,
            deposit: Decimal::ZERO,
            current_order: None,
            note: String::new(),
        })
    }

    /// §4.5: bind/relink a credential to a chat; refuses to steal a `Busy`
    /// operator's chat out from under it.
    async fn do_set_operator_key(&self, req: SetOperatorKeyRequest) -> Result<Operator, DomainError> {
        let credential = Credential {
            public_key: req.key.public.clone(),
            secret_key: req.key.secret.clone(),
        };
        let account = self.marketplace.get_account(&credential).await.map_err(|err| {
            log::warn!("set_operator_key: credential rejected: {err:#}");
            DomainError::InvalidKey
        })?;

        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let existing = operators::lock_by_username(&tx, &account.username)
            .await
            .map_err(db_err)?;

        let (operator, previous_chat) = match existing {
            Some(op) => {
                let rebinding = op.chat_id.as_deref() != Some(req.chat_id.as_str());
                if rebinding && op.status == OperatorStatus::Busy {
                    return Err(DomainError::Forbidden);
                }
                let previous_chat = op.chat_id.clone();
                (op, previous_chat)
            }
            None => {
                let created = operators::insert(&tx, &account.username, &req.chat_id)
                    .await
                    .map_err(db_err)?;
                (created, None)
            }
        };

        operators::set_credential(&tx, operator.id, &req.key.public, &req.key.secret)
            .await
            .map_err(db_err)?;
        operators::set_chat(&tx, operator.id, &req.chat_id)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        if let Some(previous_chat) = previous_chat {
            if previous_chat != req.chat_id {
                self.event_bus.notify(
                    previous_chat,
                    "this operator account was relinked to another chat".to_string(),
                );
            }
        }

        Ok(Operator {
            chat_id: Some(req.chat_id),
            api_key: Some(req.key.public),
            api_secret: Some(req.key.secret),
            status: OperatorStatus::Inactive,
            ..operator
        })
    }

    async fn do_set_operator_status(
        &self,
        req: SetOperatorStatusRequest,
    ) -> Result<bool, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let operator = operators::lock_by_chat(&tx, &req.chat_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;
        operators::set_status(&tx, operator.id, req.status)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        if req.status == OperatorStatus::Ready {
            self.manager.push_operator(operator.id, true).await;
        }

        Ok(true)
    }

    async fn do_operator_by_chat(&self, chat_id: String) -> Result<Operator, DomainError> {
        let conn = self.db_pool.get().await.map_err(db_err)?;
        operators::get_by_chat(&*conn, &chat_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)
    }

    async fn do_operator_by_id(&self, operator_id: OperatorId) -> Result<Operator, DomainError> {
        let conn = self.db_pool.get().await.map_err(db_err)?;
        operators::get_by_id(&*conn, operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)
    }

    /// §6 "Shared receiving address": the deposit address is the platform's
    /// own wallet, not a per-operator account; the operator id is only
    /// validated to exist.
    async fn do_get_deposit_refill_address(
        &self,
        operator_id: OperatorId,
    ) -> Result<DepositAddress, DomainError> {
        let conn = self.db_pool.get().await.map_err(db_err)?;
        operators::get_by_id(&*conn, operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;

        let credential = Credential {
            public_key: self.wallet.public_key.clone(),
            secret_key: self.wallet.secret_key.clone(),
        };
        let address = self.marketplace.get_deposit_address(&credential).await.map_err(|err| {
            log::error!("get_deposit_refill_address: {err:#}");
            DomainError::ServiceUnavailable
        })?;

        Ok(DepositAddress { address })
    }

    async fn do_create_order(&self, req: CreateOrderRequest) -> Result<Order, DomainError> {
        let quote = self.rate_cache.get(&req.currency).await.map_err(|err| {
            log::warn!("create_order: no rate available for {}: {err:#}", req.currency);
            DomainError::ServiceUnavailable
        })?;
        let lb_amount = Order::compute_lb_amount(req.fiat_amount, quote.minimal);

        let conn = self.db_pool.get().await.map_err(db_err)?;
        let order = orders::insert(
            &*conn,
            &req.client_name,
            &req.destination_address,
            &req.payment_method,
            &req.currency,
            req.fiat_amount,
            lb_amount,
        )
        .await
        .map_err(db_err)?;

        self.manager.push_order(order.id, true).await;
        Ok(order)
    }

    async fn do_get_order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let conn = self.db_pool.get().await.map_err(db_err)?;
        orders::get_by_id(&*conn, order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)
    }

    async fn do_skip_offer(&self, req: OperatorOrderRequest) -> Result<bool, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let operator = operators::lock_by_id(&tx, req.operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;
        if operator.status != OperatorStatus::Proposal || operator.current_order != Some(req.order_id) {
            return Err(DomainError::UnexpectedStatus);
        }
        // Leave `current_order` at the skipped order's id: PushOperator{anew:
        // false} rescans above it, and zeroing it here (like release_to_ready
        // does for terminal cases) would re-offer the very order just skipped.
        operators::set_status(&tx, operator.id, OperatorStatus::Ready)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        self.manager.push_operator(operator.id, false).await;
        Ok(true)
    }

    /// §4.2: `Accepted|Linked|ConfirmationExtended -> Dropped`.
    async fn do_drop_order(&self, req: OperatorOrderRequest) -> Result<bool, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, req.order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        let operator = operators::lock_by_id(&tx, req.operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;

        if order.operator_id != Some(operator.id)
            || !matches!(
                order.status,
                OrderStatus::Accepted | OrderStatus::Linked | OrderStatus::ConfirmationExtended
            )
        {
            return Err(DomainError::UnexpectedStatus);
        }

        let now = Utc::now();
        orders::set_status(&tx, order.id, OrderStatus::Dropped, now)
            .await
            .map_err(db_err)?;
        operators::release_to_ready(&tx, operator.id).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut dropped = order;
        dropped.status = OrderStatus::Dropped;
        dropped.updated_at = now;
        self.event_bus.publish_order(dropped);

        Ok(true)
    }

    /// §4.2: `Accepted -> Linked`, matched against a contact on the owning
    /// operator's own marketplace account.
    async fn do_link_lb_contact(&self, req: LinkLbContactRequest) -> Result<Order, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, req.order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        if order.status != OrderStatus::Accepted {
            return Err(DomainError::UnexpectedStatus);
        }
        let operator_id = order.operator_id.ok_or(DomainError::UnknownOperator)?;
        let operator = operators::lock_by_id(&tx, operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;
        let key = operator.credential().ok_or(DomainError::InvalidKey)?;
        let credential = Credential {
            public_key: key.public,
            secret_key: key.secret,
        };

        let contact = self
            .marketplace
            .find_contact(&credential, &order.currency, order.fiat_amount)
            .await
            .map_err(|err| {
                log::error!("link_lb_contact: {err:#}");
                DomainError::ServiceUnavailable
            })?
            .ok_or(DomainError::ContactNotFound)?;

        let now = Utc::now();
        orders::link_contact(&tx, order.id, contact.contact_id, &req.requisites, now)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut linked = order;
        linked.status = OrderStatus::Linked;
        linked.lb_contact_id = Some(contact.contact_id);
        linked.requisites = req.requisites;
        linked.updated_at = now;
        self.event_bus.publish_order(linked.clone());

        Ok(linked)
    }

    /// §4.2: `Linked -> Payment`.
    async fn do_request_payment(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        if order.status != OrderStatus::Linked {
            return Err(DomainError::UnexpectedStatus);
        }

        let now = Utc::now();
        orders::request_payment(&tx, order_id, now).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut updated = order;
        updated.status = OrderStatus::Payment;
        updated.payment_requested_at = Some(now);
        updated.updated_at = now;
        self.event_bus.publish_order(updated.clone());

        Ok(updated)
    }

    /// §4.2: `Payment -> Confirmation`.
    async fn do_mark_payed(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        if order.status != OrderStatus::Payment {
            return Err(DomainError::UnexpectedStatus);
        }

        let now = Utc::now();
        orders::mark_payed(&tx, order_id, now).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        let mut updated = order;
        updated.status = OrderStatus::Confirmation;
        updated.marked_payed_at = Some(now);
        updated.updated_at = now;
        self.event_bus.publish_order(updated.clone());

        Ok(updated)
    }

    /// §4.2: `Confirmation|ConfirmationExtended -> Transfer`. The debit and
    /// status change are one transaction; the operational notification is
    /// mandatory — on failure the transaction is dropped unconmitted, which
    /// rolls it back, and the RPC fails with `notify failed`.
    async fn do_confirm_payment(&self, order_id: OrderId) -> Result<Order, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        if !matches!(order.status, OrderStatus::Confirmation | OrderStatus::ConfirmationExtended) {
            return Err(DomainError::UnexpectedStatus);
        }
        let operator_id = order.operator_id.ok_or(DomainError::UnknownOperator)?;
        let operator = operators::lock_by_id(&tx, operator_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::UnknownOperator)?;

        let debit = order.lb_amount
            - order.lb_fee.unwrap_or(Decimal::ZERO)
            - order.operator_fee.unwrap_or(Decimal::ZERO);
        let now = Utc::now();
        orders::confirm_and_transfer(&tx, order_id, operator_id, debit, now)
            .await
            .map_err(db_err)?;

        let chat_id = operator.chat_id.ok_or(DomainError::NotifyFailed)?;
        let message = format!("order {} confirmed, {debit} BTC transferred", order_id.0);
        if !self.event_bus.notify_mandatory(chat_id, message) {
            // tx is dropped here without a commit, rolling back the debit.
            return Err(DomainError::NotifyFailed);
        }

        tx.commit().await.map_err(db_err)?;

        let mut transferred = order;
        transferred.status = OrderStatus::Transfer;
        transferred.updated_at = now;
        self.event_bus.publish_order(transferred.clone());

        Ok(transferred)
    }

    /// §4.2: any of `New|Accepted|Linked|Payment|Confirmation -> Canceled`.
    async fn do_cancel_order(&self, order_id: OrderId) -> Result<bool, DomainError> {
        let mut conn = self.db_pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let order = orders::lock_by_id(&tx, order_id)
            .await
            .map_err(db_err)?
            .ok_or(DomainError::OrderUnavailable)?;
        let cancelable = matches!(
            order.status,
            OrderStatus::New
                | OrderStatus::Accepted
                | OrderStatus::Linked
                | OrderStatus::Payment
                | OrderStatus::Confirmation
        );
        if !cancelable {
            return Err(DomainError::UnexpectedStatus);
        }

        let now = Utc::now();
        orders::set_status(&tx, order_id, OrderStatus::Canceled, now)
            .await
            .map_err(db_err)?;
        if let Some(operator_id) = order.operator_id {
            operators::release_to_ready(&tx, operator_id).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        let mut canceled = order;
        canceled.status = OrderStatus::Canceled;
        canceled.updated_at = now;
        self.event_bus.publish_order(canceled);

        Ok(true)
    }
}

impl OrderRpc for OrderRpcImpl {
    fn check_key(&self, key: KeyInput) -> RpcResult<Operator> {
        self.runtime
            .block_on(self.do_check_key(key))
            .map_err(domain_error_to_rpc)
    }

    fn set_operator_key(&self, req: SetOperatorKeyRequest) -> RpcResult<Operator> {
        self.runtime
            .block_on(self.do_set_operator_key(req))
            .map_err(domain_error_to_rpc)
    }

    fn set_operator_status(&self, req: SetOperatorStatusRequest) -> RpcResult<bool> {
        self.runtime
            .block_on(self.do_set_operator_status(req))
            .map_err(domain_error_to_rpc)
    }

    fn operator_by_chat(&self, chat_id: String) -> RpcResult<Operator> {
        self.runtime
            .block_on(self.do_operator_by_chat(chat_id))
            .map_err(domain_error_to_rpc)
    }

    fn operator_by_id(&self, operator_id: OperatorId) -> RpcResult<Operator> {
        self.runtime
            .block_on(self.do_operator_by_id(operator_id))
            .map_err(domain_error_to_rpc)
    }

    fn get_deposit_refill_address(&self, operator_id: OperatorId) -> RpcResult<DepositAddress> {
        self.runtime
            .block_on(self.do_get_deposit_refill_address(operator_id))
            .map_err(domain_error_to_rpc)
    }

    fn create_order(&self, req: CreateOrderRequest) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_create_order(req))
            .map_err(domain_error_to_rpc)
    }

    fn get_order(&self, order_id: OrderId) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_get_order(order_id))
            .map_err(domain_error_to_rpc)
    }

    fn accept_offer(&self, req: OperatorOrderRequest) -> RpcResult<Order> {
        self.runtime
            .block_on(self.manager.accept_offer(req.operator_id, req.order_id))
            .map_err(domain_error_to_rpc)
    }

    fn skip_offer(&self, req: OperatorOrderRequest) -> RpcResult<bool> {
        self.runtime
            .block_on(self.do_skip_offer(req))
            .map_err(domain_error_to_rpc)
    }

    fn drop_order(&self, req: OperatorOrderRequest) -> RpcResult<bool> {
        self.runtime
            .block_on(self.do_drop_order(req))
            .map_err(domain_error_to_rpc)
    }

    fn link_lb_contact(&self, req: LinkLbContactRequest) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_link_lb_contact(req))
            .map_err(domain_error_to_rpc)
    }

    fn request_payment(&self, order_id: OrderId) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_request_payment(order_id))
            .map_err(domain_error_to_rpc)
    }

    fn mark_payed(&self, order_id: OrderId) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_mark_payed(order_id))
            .map_err(domain_error_to_rpc)
    }

    fn confirm_payment(&self, order_id: OrderId) -> RpcResult<Order> {
        self.runtime
            .block_on(self.do_confirm_payment(order_id))
            .map_err(domain_error_to_rpc)
    }

    fn cancel_order(&self, order_id: OrderId) -> RpcResult<bool> {
        self.runtime
            .block_on(self.do_cancel_order(order_id))
            .map_err(domain_error_to_rpc)
    }
}
