use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::digest::generic_array::{typenum::U32, GenericArray};
use hmac::{Hmac, Mac};
use hyper::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::dto::{AccountInfo, Contact, Credential, Page, RateAd, WalletTransaction};
use crate::rest_client::{RestClient, RestResponse, UriBuilder};

const HOST: &str = "marketplace.example";
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_ON_500: Duration = Duration::from_millis(200);
const RETRY_DELAY_ON_STALE_NONCE: Duration = Duration::from_millis(1);
/// Provider's "nonce too small" error code (§6).
const ERROR_CODE_STALE_NONCE: i64 = 42;

/// §1/§6: the external marketplace is an opaque provider of accounts, wallet
/// transactions, contacts, and rate advertisements. Everything else about
/// trading on it is out of scope.
#[async_trait]
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Marketplace: Send + Sync {
    async fn get_account(&self, credential: &Credential) -> Result<AccountInfo>;
    async fn get_deposit_address(&self, credential: &Credential) -> Result<String>;
    async fn list_wallet_transactions(
        &self,
        credential: &Credential,
    ) -> Result<Vec<WalletTransaction>>;
    async fn find_contact(
        &self,
        credential: &Credential,
        currency: &str,
        amount: Decimal,
    ) -> Result<Option<Contact>>;
    async fn list_rate_ads(&self, currency: &str) -> Result<Vec<RateAd>>;
}

/// Monotonically increasing nonce in 100ns units since the epoch (§6). A
/// plain `SystemTime` read can go backwards or repeat under clock skew or
/// rapid calls, so the last value is cached and bumped by at least one unit.
struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos() as u64
            / 100;

        loop {
            let last = self.last.load(Ordering::Relaxed);
            let candidate = now.max(last + 1);
            if self
                .last
                .compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

pub struct HttpMarketplaceClient {
    rest_client: RestClient,
    nonce: NonceGenerator,
}

impl Default for HttpMarketplaceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMarketplaceClient {
    pub fn new() -> Self {
        Self {
            rest_client: RestClient::new(),
            nonce: NonceGenerator::new(),
        }
    }

    /// HMAC-SHA256 over `nonce || public_key || endpoint || args`, hex-uppercased (§6).
    fn sign(&self, credential: &Credential, endpoint: &str, builder: &mut UriBuilder) -> String {
        let nonce = self.nonce.next();
        builder.add_kv("nonce", nonce);
        builder.add_kv("public_key", &credential.public_key);

        let mut message = Vec::with_capacity(builder.query().len() + endpoint.len());
        message.extend_from_slice(nonce.to_string().as_bytes());
        message.extend_from_slice(credential.public_key.as_bytes());
        message.extend_from_slice(endpoint.as_bytes());
        message.extend_from_slice(builder.query());

        let mut hmac = Hmac::<Sha256>::new_from_slice(credential.secret_key.as_bytes())
            .expect("hmac accepts keys of any length");
        hmac.update(&message);
        let signature = hmac.finalize().into_bytes();

        struct HexUpper<'a>(&'a GenericArray<u8, U32>);
        impl fmt::Display for HexUpper<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{:X}", self.0)
            }
        }
        HexUpper(&signature).to_string()
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        endpoint: &str,
    ) -> Result<T> {
        self.retrying(|| async {
            let mut builder = UriBuilder::new(endpoint);
            builder.ensure_free_size(128);
            let signature = self.sign(credential, endpoint, &mut builder);
            builder.add_kv("signature", signature);

            let uri = builder.build_uri(HOST);
            let response = self.rest_client.get(uri).await?;
            parse_response(response)
        })
        .await
    }

    /// §6 retry policy: up to 3 attempts; 500 waits 200ms; provider error
    /// code 42 ("nonce too small") waits 1ms and retries; anything else
    /// surfaces the provider's message immediately.
    async fn retrying<F, Fut, T>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for _ in 0..RETRY_ATTEMPTS {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(ProviderError::ServerError) = err.downcast_ref::<ProviderError>() {
                        tokio::time::sleep(RETRY_DELAY_ON_500).await;
                    } else if let Some(ProviderError::StaleNonce) = err.downcast_ref::<ProviderError>()
                    {
                        tokio::time::sleep(RETRY_DELAY_ON_STALE_NONCE).await;
                    } else {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        endpoint: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next: Option<String> = Some(endpoint.to_owned());
        while let Some(path) = next {
            let page: Page<T> = self.signed_get(credential, &path).await?;
            items.extend(page.data.list);
            next = page.pagination.next;
        }
        Ok(items)
    }
}

#[derive(Debug, thiserror::Error)]
enum ProviderError {
    #[error("marketplace returned a server error")]
    ServerError,
    #[error("marketplace rejected nonce as stale")]
    StaleNonce,
}

fn parse_response<T: DeserializeOwned>(response: RestResponse) -> Result<T> {
    if response.status == StatusCode::INTERNAL_SERVER_ERROR {
        bail!(ProviderError::ServerError);
    }
    if let Ok(error) = serde_json::from_str::<ProviderErrorBody>(&response.content) {
        if error.error_code == ERROR_CODE_STALE_NONCE {
            bail!(ProviderError::StaleNonce);
        }
        bail!("marketplace error {}: {}", error.error_code, error.message);
    }
    if !response.status.is_success() {
        bail!("marketplace returned {}: {}", response.status, response.content);
    }
    serde_json::from_str(&response.content).context("parsing marketplace response")
}

#[derive(serde::Deserialize)]
struct ProviderErrorBody {
    error_code: i64,
    message: String,
}

#[async_trait]
impl Marketplace for HttpMarketplaceClient {
    async fn get_account(&self, credential: &Credential) -> Result<AccountInfo> {
        self.signed_get(credential, "/v2/myself").await
    }

    async fn get_deposit_address(&self, credential: &Credential) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Response {
            address: String,
        }
        let response: Response = self.signed_get(credential, "/v2/wallet-addr").await?;
        Ok(response.address)
    }

    async fn list_wallet_transactions(
        &self,
        credential: &Credential,
    ) -> Result<Vec<WalletTransaction>> {
        self.fetch_all_pages(credential, "/v2/wallet-sent-received").await
    }

    async fn find_contact(
        &self,
        credential: &Credential,
        currency: &str,
        amount: Decimal,
    ) -> Result<Option<Contact>> {
        let contacts: Vec<Contact> = self
            .fetch_all_pages(credential, "/v2/contacts/dashboard")
            .await?;
        Ok(contacts
            .into_iter()
            .find(|c| c.currency == currency && c.amount == amount))
    }

    async fn list_rate_ads(&self, currency: &str) -> Result<Vec<RateAd>> {
        let endpoint = format!("/v2/public-ads/list/{currency}");
        let mut builder = UriBuilder::new(&endpoint);
        builder.add_kv("currency", currency);
        let uri = builder.build_uri(HOST);
        let response = self.rest_client.get(uri).await?;
        parse_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_monotonic_even_under_repeated_reads() {
        let gen = NonceGenerator::new();
        let first = gen.next();
        let second = gen.next();
        assert!(second > first);
    }

    #[test]
    fn signature_changes_with_nonce() {
        let client = HttpMarketplaceClient::new();
        let credential = Credential {
            public_key: "pub".into(),
            secret_key: "secret".into(),
        };
        let mut a = UriBuilder::new("/v2/myself");
        let sig_a = client.sign(&credential, "/v2/myself", &mut a);
        let mut b = UriBuilder::new("/v2/myself");
        let sig_b = client.sign(&credential, "/v2/myself", &mut b);
        assert_ne!(sig_a, sig_b);
    }
}
