//! Process-wide exchange-rate cache (§5): `currency -> {minimal, median,
//! checked_at}` behind a `parking_lot::RwLock`, fetched on miss from the
//! calling RPC thread and refreshed in the background for whichever
//! currencies are actually in use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use lbmatch_external_marketplace::Marketplace;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::engine::Service;
use crate::settings::RateCacheSettings;

#[derive(Debug, Clone, Copy)]
pub struct RateQuote {
    pub minimal: Decimal,
    pub median: Decimal,
    pub checked_at: DateTime<Utc>,
}

impl RateQuote {
    fn is_stale(&self, stale_after: chrono::Duration) -> bool {
        Utc::now() - self.checked_at > stale_after
    }
}

fn quote_from_ads(rates: &[Decimal]) -> Option<RateQuote> {
    if rates.is_empty() {
        return None;
    }
    let mut sorted = rates.to_vec();
    sorted.sort();
    let minimal = sorted[0];
    let median = sorted[sorted.len() / 2];
    Some(RateQuote {
        minimal,
        median,
        checked_at: Utc::now(),
    })
}

pub struct RateCache {
    marketplace: Arc<dyn Marketplace>,
    cache: RwLock<HashMap<String, RateQuote>>,
    /// currencies any RPC caller has ever asked for; the background
    /// refresh task only bothers with this active subset.
    active: DashSet<String>,
    stale_after: chrono::Duration,
}

impl RateCache {
    pub fn new(marketplace: Arc<dyn Marketplace>, settings: &RateCacheSettings) -> Arc<Self> {
        Arc::new(Self {
            marketplace,
            cache: RwLock::new(HashMap::new()),
            active: DashSet::new(),
            stale_after: chrono::Duration::seconds(settings.stale_after_secs as i64),
        })
    }

    /// Fetch-on-miss: returns the cached quote if fresh, otherwise calls out
    /// to the marketplace synchronously from the caller's own task.
    pub async fn get(&self, currency: &str) -> Result<RateQuote> {
        self.active.insert(currency.to_owned());

        if let Some(quote) = self.cache.read().get(currency).copied() {
            if !quote.is_stale(self.stale_after) {
                return Ok(quote);
            }
        }

        self.refresh_one(currency).await
    }

    async fn refresh_one(&self, currency: &str) -> Result<RateQuote> {
        let ads = self
            .marketplace
            .list_rate_ads(currency)
            .await
            .with_context(|| format!("list_rate_ads({currency})"))?;
        let rates: Vec<Decimal> = ads.into_iter().map(|ad| ad.rate).collect();
        let quote = quote_from_ads(&rates)
            .with_context(|| format!("no rate ads available for {currency}"))?;
        self.cache.write().insert(currency.to_owned(), quote);
        Ok(quote)
    }

    async fn refresh_active(&self) {
        let currencies: Vec<String> = self.active.iter().map(|entry| entry.clone()).collect();
        for currency in currencies {
            if let Err(err) = self.refresh_one(&currency).await {
                log::warn!("background rate refresh failed for {currency}: {err:#}");
            }
        }
    }
}

pub struct RateCacheService {
    finished_rx: parking_lot::Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl Service for RateCacheService {
    fn name(&self) -> &str {
        "RateCache"
    }

    fn graceful_shutdown(self: Arc<Self>) -> Option<oneshot::Receiver<Result<()>>> {
        self.finished_rx.lock().take()
    }
}

pub fn spawn(
    cache: Arc<RateCache>,
    settings: RateCacheSettings,
    stop_token: lbmatch_utils::cancellation_token::CancellationToken,
) -> Arc<RateCacheService> {
    let period = StdDuration::from_secs(settings.refresh_interval_secs);
    let (finished_tx, finished_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if stop_token.is_cancellation_requested() {
                break;
            }
            cache.refresh_active().await;
        }
        let _ = finished_tx.send(Ok(()));
    });

    Arc::new(RateCacheService {
        finished_rx: parking_lot::Mutex::new(Some(finished_rx)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_and_minimal_of_sorted_rates() {
        let rates = vec![Decimal::new(12, 1), Decimal::new(10, 1), Decimal::new(11, 1)];
        let quote = quote_from_ads(&rates).expect("non-empty");
        assert_eq!(quote.minimal, Decimal::new(10, 1));
        assert_eq!(quote.median, Decimal::new(11, 1));
    }

    #[test]
    fn empty_ads_yield_no_quote() {
        assert!(quote_from_ads(&[]).is_none());
    }
}
