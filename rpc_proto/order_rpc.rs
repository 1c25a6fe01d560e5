//! Core order/operator RPC surface (§6). One explicit input/output struct
//! pair per call, registered by name through `jsonrpc-derive` rather than
//! any dynamic function-type reflection (§9).

use chrono::{DateTime, Utc};
use jsonrpc_core::{Error as RpcError, ErrorCode as RpcErrorCode, Result as RpcResult};
use jsonrpc_derive::rpc;
use lbmatch_domain::{DomainError, Operator, OperatorId, OperatorStatus, Order, OrderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maps a [`DomainError`] onto the wire representation from §7: the string
/// kind travels in the JSON-RPC error message, never folded into a generic
/// "internal error".
pub fn domain_error_to_rpc(err: DomainError) -> RpcError {
    RpcError {
        code: RpcErrorCode::ServerError(1),
        message: err.to_string(),
        data: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInput {
    pub public: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOperatorKeyRequest {
    pub chat_id: String,
    pub key: KeyInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOperatorStatusRequest {
    pub chat_id: String,
    pub status: OperatorStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub client_name: String,
    pub destination_address: String,
    pub payment_method: String,
    pub currency: String,
    pub fiat_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorOrderRequest {
    pub operator_id: OperatorId,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkLbContactRequest {
    pub order_id: OrderId,
    pub requisites: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    pub address: String,
}

#[rpc]
pub trait OrderRpc {
    #[rpc(name = "check_key")]
    fn check_key(&self, key: KeyInput) -> RpcResult<Operator>;

    #[rpc(name = "set_operator_key")]
    fn set_operator_key(&self, req: SetOperatorKeyRequest) -> RpcResult<Operator>;

    #[rpc(name = "set_operator_status")]
    fn set_operator_status(&self, req: SetOperatorStatusRequest) -> RpcResult<bool>;

    #[rpc(name = "operator_by_chat")]
    fn operator_by_chat(&self, chat_id: String) -> RpcResult<Operator>;

    #[rpc(name = "operator_by_id")]
    fn operator_by_id(&self, operator_id: OperatorId) -> RpcResult<Operator>;

    #[rpc(name = "get_deposit_refill_address")]
    fn get_deposit_refill_address(&self, operator_id: OperatorId) -> RpcResult<DepositAddress>;

    #[rpc(name = "create_order")]
    fn create_order(&self, req: CreateOrderRequest) -> RpcResult<Order>;

    #[rpc(name = "get_order")]
    fn get_order(&self, order_id: OrderId) -> RpcResult<Order>;

    #[rpc(name = "accept_offer")]
    fn accept_offer(&self, req: OperatorOrderRequest) -> RpcResult<Order>;

    #[rpc(name = "skip_offer")]
    fn skip_offer(&self, req: OperatorOrderRequest) -> RpcResult<bool>;

    #[rpc(name = "drop_order")]
    fn drop_order(&self, req: OperatorOrderRequest) -> RpcResult<bool>;

    #[rpc(name = "link_lb_contact")]
    fn link_lb_contact(&self, req: LinkLbContactRequest) -> RpcResult<Order>;

    #[rpc(name = "request_payment")]
    fn request_payment(&self, order_id: OrderId) -> RpcResult<Order>;

    #[rpc(name = "mark_payed")]
    fn mark_payed(&self, order_id: OrderId) -> RpcResult<Order>;

    #[rpc(name = "confirm_payment")]
    fn confirm_payment(&self, order_id: OrderId) -> RpcResult<Order>;

    #[rpc(name = "cancel_order")]
    fn cancel_order(&self, order_id: OrderId) -> RpcResult<bool>;
}

/// §6 event-bus payloads, carried over the `order_event`/`offer_event`/
/// `telegram_notify` routes. These are not RPC calls, so they live outside
/// the `#[rpc]` trait, but share the same wire types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferEvent {
    pub chats: Vec<String>,
    pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub chat_id: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}
