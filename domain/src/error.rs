use thiserror::Error;

/// Stable wire-level error kinds surfaced to RPC callers (§7). The `Display`
/// string is the on-the-wire code and must not change without a protocol bump.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("db_error")]
    Db,
    #[error("forbidden")]
    Forbidden,
    #[error("unexpected status")]
    UnexpectedStatus,
    #[error("contact not found")]
    ContactNotFound,
    #[error("lack of deposit")]
    LackOfDeposit,
    #[error("unknown operator")]
    UnknownOperator,
    #[error("order unavailable")]
    OrderUnavailable,
    #[error("invalid key")]
    InvalidKey,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("notify failed")]
    NotifyFailed,
}

impl DomainError {
    /// Whether a caller may usefully retry the same command, as opposed to
    /// a structural error that will never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Db | DomainError::ServiceUnavailable)
    }
}
