use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// §3 LBTransaction (deposit ledger). `(created_at, direction, amount, description)`
/// forms the unique constraint backing idempotent ingestion (§4.3).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum TransactionDirection {
    To,
    From,
}

impl TransactionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionDirection::To => "to",
            TransactionDirection::From => "from",
        }
    }
}

impl std::str::FromStr for TransactionDirection {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "to" => Ok(TransactionDirection::To),
            "from" => Ok(TransactionDirection::From),
            _ => Err(crate::error::DomainError::Db),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LBTransaction {
    pub created_at: DateTime<Utc>,
    pub direction: TransactionDirection,
    pub amount: Decimal,
    pub description: String,
    pub btc_tx_id: Option<String>,
}

/// §9: the prefix/base used for ingestion has two incompatible revisions
/// upstream (`DEPO_` vs `DEPO.`); this implementation commits to `DEPO.`
/// with a base-36 operator id, as the spec directs.
pub const DEPOSIT_TRANSACTION_PREFIX: &str = "DEPO.";

/// Parses a deposit-credit description of the form `DEPO.<base36 operator id>`.
/// Returns `None` for any other description (§4.3: such rows are still
/// persisted for audit, but credit no operator).
pub fn parse_deposit_operator_id(description: &str) -> Option<i64> {
    let suffix = description.strip_prefix(DEPOSIT_TRANSACTION_PREFIX)?;
    i64::from_str_radix(suffix, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base36_operator_id() {
        assert_eq!(parse_deposit_operator_id("DEPO.3K"), Some(128));
        assert_eq!(parse_deposit_operator_id("DEPO.1"), Some(1));
    }

    #[test]
    fn rejects_unrelated_description() {
        assert_eq!(parse_deposit_operator_id("refund"), None);
        assert_eq!(parse_deposit_operator_id("DEPO_3K"), None);
    }
}
