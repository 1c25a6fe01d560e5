use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level application settings (config.toml + credentials.toml merged, §9
/// "configuration loading" is out of scope for the domain but still needs a
/// concrete home for the knobs the rest of the system reads).
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppSettings {
    pub core: CoreSettings,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct CoreSettings {
    pub database: DbSettings,
    pub order_timeouts: OrderTimeouts,
    pub deposit_reconciliation: DepositReconciliationSettings,
    pub rate_cache: RateCacheSettings,
    pub wallet: WalletSettings,
    pub ipc_address: Option<String>,
}

/// §4.3: the platform's own marketplace account, polled once per
/// reconciliation tick for the wallet's full sent/received history. Distinct
/// from each Operator's own per-account credential (§3).
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct WalletSettings {
    pub public_key: String,
    pub secret_key: String,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct DbSettings {
    pub url: String,
    pub max_connections: u32,
    pub migrations: Vec<PathBuf>,
}

/// §4.1.d / §4.2 deadlines the manager's `tickUpdate` sweep enforces.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderTimeouts {
    pub accept_secs: u64,
    pub payment_secs: u64,
    pub confirm_secs: u64,
    /// how often `tickUpdate` runs; independent of the deadlines themselves.
    pub sweep_interval_secs: u64,
}

impl Default for OrderTimeouts {
    fn default() -> Self {
        Self {
            accept_secs: 120,
            payment_secs: 900,
            confirm_secs: 1800,
            sweep_interval_secs: 10,
        }
    }
}

/// §4.3: interval defaults to 5s.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DepositReconciliationSettings {
    pub interval_secs: u64,
    pub lookback_days: i64,
}

impl Default for DepositReconciliationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            lookback_days: 30,
        }
    }
}

/// §5 rate cache refresh knobs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateCacheSettings {
    pub refresh_interval_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for RateCacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            stale_after_secs: 120,
        }
    }
}
