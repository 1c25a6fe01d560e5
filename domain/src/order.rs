use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::operator::OperatorId;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(value: i64) -> Self {
        OrderId(value)
    }
}

/// §4.2 order state machine. Ordering here follows the totally-ordered
/// enumeration in §3 and is relied on only for display, never for
/// transition logic (transitions are an explicit DAG, see [`Order::can_transition_to`]).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Unrealizable,
    Rejected,
    Accepted,
    Dropped,
    Linked,
    Payment,
    Canceled,
    Timeout,
    Confirmation,
    ConfirmationExtended,
    Transfer,
    Finished,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected
                | OrderStatus::Dropped
                | OrderStatus::Canceled
                | OrderStatus::Timeout
                | OrderStatus::Finished
        )
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Unrealizable => "unrealizable",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Dropped => "dropped",
            OrderStatus::Linked => "linked",
            OrderStatus::Payment => "payment",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Timeout => "timeout",
            OrderStatus::Confirmation => "confirmation",
            OrderStatus::ConfirmationExtended => "confirmation_extended",
            OrderStatus::Transfer => "transfer",
            OrderStatus::Finished => "finished",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new" => OrderStatus::New,
            "unrealizable" => OrderStatus::Unrealizable,
            "rejected" => OrderStatus::Rejected,
            "accepted" => OrderStatus::Accepted,
            "dropped" => OrderStatus::Dropped,
            "linked" => OrderStatus::Linked,
            "payment" => OrderStatus::Payment,
            "canceled" => OrderStatus::Canceled,
            "timeout" => OrderStatus::Timeout,
            "confirmation" => OrderStatus::Confirmation,
            "confirmation_extended" => OrderStatus::ConfirmationExtended,
            "transfer" => OrderStatus::Transfer,
            "finished" => OrderStatus::Finished,
            _ => return Err(DomainError::Db),
        })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// §4.2's transition DAG. Any pair not listed here is a protocol violation.
const ALLOWED_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::New, OrderStatus::Accepted),
    (OrderStatus::New, OrderStatus::Rejected),
    (OrderStatus::New, OrderStatus::Canceled),
    (OrderStatus::Accepted, OrderStatus::Linked),
    (OrderStatus::Accepted, OrderStatus::Dropped),
    (OrderStatus::Accepted, OrderStatus::Canceled),
    (OrderStatus::Linked, OrderStatus::Payment),
    (OrderStatus::Linked, OrderStatus::Dropped),
    (OrderStatus::Linked, OrderStatus::Canceled),
    (OrderStatus::Payment, OrderStatus::Confirmation),
    (OrderStatus::Payment, OrderStatus::Timeout),
    (OrderStatus::Payment, OrderStatus::Canceled),
    (OrderStatus::Confirmation, OrderStatus::Transfer),
    (OrderStatus::Confirmation, OrderStatus::ConfirmationExtended),
    (OrderStatus::Confirmation, OrderStatus::Canceled),
    (OrderStatus::ConfirmationExtended, OrderStatus::Transfer),
    (OrderStatus::ConfirmationExtended, OrderStatus::Dropped),
    (OrderStatus::Transfer, OrderStatus::Finished),
];

/// §3 Order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_name: String,
    pub destination_address: String,
    pub payment_method: String,
    pub currency: String,
    pub fiat_amount: Decimal,
    pub lb_amount: Decimal,
    /// 0 until linked.
    pub lb_contact_id: Option<i64>,
    pub lb_fee: Option<Decimal>,
    pub operator_fee: Option<Decimal>,
    pub bot_fee: Option<Decimal>,
    pub requisites: String,
    /// 0 until accepted.
    pub operator_id: Option<OperatorId>,
    pub status: OrderStatus,
    pub payment_requested_at: Option<DateTime<Utc>>,
    pub marked_payed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        ALLOWED_TRANSITIONS.contains(&(self.status, next))
    }

    /// Guard every RPC-driven transition through this so a retried call on an
    /// already-advanced order returns `unexpected status` instead of silently
    /// reapplying (§4.2: "idempotent under retry only when guarded by a
    /// precondition check on current status").
    pub fn try_transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::UnexpectedStatus);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// §3: `fiat_amount / best_offer_rate` at creation time.
    pub fn compute_lb_amount(fiat_amount: Decimal, best_offer_rate: Decimal) -> Decimal {
        fiat_amount / best_offer_rate
    }

    pub fn is_open_for_offer(&self) -> bool {
        matches!(self.status, OrderStatus::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::New, OrderStatus::Accepted, true)]
    #[case(OrderStatus::New, OrderStatus::Finished, false)]
    #[case(OrderStatus::Confirmation, OrderStatus::Transfer, true)]
    #[case(OrderStatus::ConfirmationExtended, OrderStatus::Transfer, true)]
    #[case(OrderStatus::Payment, OrderStatus::Finished, false)]
    fn transition_table(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] allowed: bool) {
        let mut order = sample_order(from);
        let result = order.try_transition(to, Utc::now());
        assert_eq!(result.is_ok(), allowed);
    }

    #[test]
    fn rejects_redundant_retry() {
        let mut order = sample_order(OrderStatus::Accepted);
        order.try_transition(OrderStatus::Linked, Utc::now()).unwrap();
        // a retried RPC trying to re-apply `Accepted -> Linked` must fail, not no-op.
        let err = order.try_transition(OrderStatus::Linked, Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::UnexpectedStatus);
    }

    fn sample_order(status: OrderStatus) -> Order {
        Order {
            id: OrderId(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            client_name: "Alice".into(),
            destination_address: "addr".into(),
            payment_method: "iban".into(),
            currency: "USD".into(),
            fiat_amount: Decimal::new(100, 0),
            lb_amount: Decimal::new(10, 0),
            lb_contact_id: None,
            lb_fee: None,
            operator_fee: None,
            bot_fee: None,
            requisites: String::new(),
            operator_id: None,
            status,
            payment_requested_at: None,
            marked_payed_at: None,
        }
    }
}
