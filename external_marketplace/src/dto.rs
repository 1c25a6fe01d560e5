//! Wire DTOs for the parts of the external marketplace API this platform
//! actually consumes (§1: accounts, wallet, transactions, contacts, rate ads).

use chrono::{DateTime, Utc};
use lbmatch_utils::time::u64_to_date_time;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub public_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub username: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum WalletDirection {
    #[serde(rename = "sent")]
    Sent,
    #[serde(rename = "received")]
    Received,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub direction: WalletDirection,
    pub amount: Decimal,
    pub description: String,
    #[serde(rename = "txid")]
    pub btc_tx_id: Option<String>,
    #[serde(rename = "created_at", deserialize_with = "deserialize_epoch_millis")]
    pub created_at: DateTime<Utc>,
}

fn deserialize_epoch_millis<'de, D>(de: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = u64::deserialize(de)?;
    Ok(u64_to_date_time(millis))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: i64,
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateAd {
    pub currency: String,
    pub rate: Decimal,
}

/// §6: "paginated responses follow a `pagination.next` link trimmed to a
/// relative URL".
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(flatten)]
    pub data: PageData<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageData<T> {
    pub list: Vec<T>,
}
