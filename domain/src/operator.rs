use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::OrderId;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(pub i64);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OperatorId {
    fn from(value: i64) -> Self {
        OperatorId(value)
    }
}

/// §3: operator lifecycle status.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum OperatorStatus {
    /// no valid credential
    None,
    /// credential present, operator not serving
    Inactive,
    /// awaiting offers
    Ready,
    /// holding an unanswered offer (`current_order` points at it)
    Proposal,
    /// actively processing an accepted order
    Busy,
    /// paused for account-management workflow
    Utility,
}

impl OperatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorStatus::None => "none",
            OperatorStatus::Inactive => "inactive",
            OperatorStatus::Ready => "ready",
            OperatorStatus::Proposal => "proposal",
            OperatorStatus::Busy => "busy",
            OperatorStatus::Utility => "utility",
        }
    }
}

impl std::str::FromStr for OperatorStatus {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(OperatorStatus::None),
            "inactive" => Ok(OperatorStatus::Inactive),
            "ready" => Ok(OperatorStatus::Ready),
            "proposal" => Ok(OperatorStatus::Proposal),
            "busy" => Ok(OperatorStatus::Busy),
            "utility" => Ok(OperatorStatus::Utility),
            _ => Err(crate::error::DomainError::Db),
        }
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque external-marketplace API credential (§3). The secret is never logged or
/// serialized back out over RPC; `Debug`/`Serialize` redact it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub public: String,
    pub secret: String,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// §3 Operator. Refers to its current `Order` only by id (§9 design note:
/// cycle Operator <-> Order via ids, never by direct ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub username: String,
    pub chat_id: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub status: OperatorStatus,
    pub deposit: Decimal,
    /// 0 (represented here as `None`) means "no current order".
    pub current_order: Option<OrderId>,
    pub note: String,
}

impl Operator {
    pub fn credential(&self) -> Option<ApiKey> {
        match (&self.api_key, &self.api_secret) {
            (Some(public), Some(secret)) => Some(ApiKey {
                public: public.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }

    /// Invariant from §3: `(status = Proposal) => current_order != 0`.
    pub fn is_holding_proposal(&self) -> bool {
        matches!(self.status, OperatorStatus::Proposal) && self.current_order.is_some()
    }

    /// Invariant from §3: `(status = Busy) => current_order != 0`.
    pub fn is_serving(&self) -> bool {
        matches!(self.status, OperatorStatus::Busy) && self.current_order.is_some()
    }

    pub fn can_cover(&self, lb_amount: Decimal) -> bool {
        self.deposit >= lb_amount
    }
}
