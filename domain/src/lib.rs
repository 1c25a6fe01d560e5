pub mod error;
pub mod operator;
pub mod order;
pub mod transaction;

pub use error::DomainError;
pub use operator::{Operator, OperatorId, OperatorStatus};
pub use order::{Order, OrderId, OrderStatus};
pub use transaction::{LBTransaction, TransactionDirection};

/// Every money/BTC quantity in this crate is a `rust_decimal::Decimal`; floating point
/// is never used for anything that ends up in a ledger or a settlement.
pub type Amount = rust_decimal::Decimal;
