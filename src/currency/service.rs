use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::amount::{Currency, SAT};

/// Currency code -> satoshis per one unit
pub type Rates = BTreeMap<String, f64>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CurrencyError {
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Rate source failed: {0}")]
    Source(String),
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn get_rates(&self) -> Result<Rates, CurrencyError>;
}

/// Ticker endpoint returning `{ "USD": { "last": 65000.0, ... }, ... }`
pub struct BlockchainInfo {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last: f64,
}

impl BlockchainInfo {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RateSource for BlockchainInfo {
    async fn get_rates(&self) -> Result<Rates, CurrencyError> {
        debug!("Obtaining exchange rates from {}", self.url);
        let tickers = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CurrencyError::Source(e.to_string()))?
            .json::<HashMap<String, Ticker>>()
            .await
            .map_err(|e| CurrencyError::Source(e.to_string()))?;

        Ok(tickers_to_rates(tickers))
    }
}

fn tickers_to_rates(tickers: HashMap<String, Ticker>) -> Rates {
    tickers
        .into_iter()
        .filter_map(|(code, ticker)| {
            if ticker.last > 0.0 && ticker.last.is_finite() {
                Some((code, 100_000_000.0 / ticker.last))
            } else {
                debug!("Skipping ticker {} with price {}", code, ticker.last);
                None
            }
        })
        .collect()
}

struct CachedRates {
    rates: Arc<Rates>,
    fetched_at: Instant,
}

struct Inner {
    source: Arc<dyn RateSource>,
    ttl: Duration,
    soft_ttl: Duration,
    cache: RwLock<Option<CachedRates>>,
    refreshing: AtomicBool,
}

/// Exchange rates behind a two-tier cache.
///
/// Rates younger than `ttl` are served as is. Rates older than `ttl` but
/// younger than `soft_ttl` are still served while one background refresh
/// runs. Anything older is fetched before returning.
#[derive(Clone)]
pub struct CurrencyService {
    inner: Arc<Inner>,
}

impl CurrencyService {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration, soft_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                soft_ttl: soft_ttl.max(ttl),
                cache: RwLock::new(None),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Currency, CurrencyError> {
        if id == SAT.id {
            return Ok(SAT);
        }
        let rates = self.rates().await?;
        match rates.get(id) {
            Some(in_sats) => Ok(Currency::new(id, *in_sats)),
            None => Err(CurrencyError::CurrencyNotFound(id.to_string())),
        }
    }

    pub async fn currencies(&self) -> Result<Vec<String>, CurrencyError> {
        Ok(self.rates().await?.keys().cloned().collect())
    }

    pub async fn rates(&self) -> Result<Arc<Rates>, CurrencyError> {
        {
            let cache = self.inner.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.inner.ttl {
                    return Ok(cached.rates.clone());
                }
                if age < self.inner.soft_ttl {
                    self.spawn_refresh();
                    return Ok(cached.rates.clone());
                }
            }
        }

        let mut cache = self.inner.cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.inner.ttl {
                return Ok(cached.rates.clone());
            }
        }
        let rates = Arc::new(Self::fetch(&self.inner).await?);
        *cache = Some(CachedRates {
            rates: rates.clone(),
            fetched_at: Instant::now(),
        });
        Ok(rates)
    }

    fn spawn_refresh(&self) {
        if self.inner.refreshing.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            debug!("Refreshing stale exchange rates in background");
            match Self::fetch(&inner).await {
                Ok(rates) => {
                    *inner.cache.write().await = Some(CachedRates {
                        rates: Arc::new(rates),
                        fetched_at: Instant::now(),
                    });
                }
                Err(e) => warn!("Background rate refresh failed: {}", e),
            }
            inner.refreshing.store(false, Ordering::Release);
        });
    }

    async fn fetch(inner: &Inner) -> Result<Rates, CurrencyError> {
        let mut rates = inner.source.get_rates().await?;
        rates.insert(SAT.id.to_string(), SAT.in_sats);
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for CountingSource {
        async fn get_rates(&self) -> Result<Rates, CurrencyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rates = Rates::new();
            rates.insert("USD".to_string(), 1500.0);
            rates.insert("EUR".to_string(), 1600.0);
            Ok(rates)
        }
    }

    /// USD moves by one sat on every fetch, starting at 1000
    struct DriftingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateSource for DriftingSource {
        async fn get_rates(&self) -> Result<Rates, CurrencyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rates = Rates::new();
            rates.insert("USD".to_string(), 1000.0 + n as f64);
            Ok(rates)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RateSource for FailingSource {
        async fn get_rates(&self) -> Result<Rates, CurrencyError> {
            Err(CurrencyError::Source("down".to_string()))
        }
    }

    fn service(source: Arc<dyn RateSource>, ttl: u64, soft: u64) -> CurrencyService {
        CurrencyService::new(source, Duration::from_secs(ttl), Duration::from_secs(soft))
    }

    #[tokio::test]
    async fn test_sat_never_hits_source() {
        let source = CountingSource::new();
        let currencies = service(source.clone(), 10, 600);

        let sat = currencies.get_by_id("SAT").await.unwrap();
        assert_eq!(sat, SAT);
        assert_eq!(source.calls(), 0);

        // Even a broken source cannot break SAT
        let broken = service(Arc::new(FailingSource), 10, 600);
        assert!(broken.get_by_id("SAT").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let currencies = service(CountingSource::new(), 10, 600);
        let err = currencies.get_by_id("XYZ").await.unwrap_err();
        assert!(matches!(err, CurrencyError::CurrencyNotFound(id) if id == "XYZ"));
    }

    #[tokio::test]
    async fn test_rates_are_cached_within_ttl() {
        let source = CountingSource::new();
        let currencies = service(source.clone(), 10, 600);

        let usd = currencies.get_by_id("USD").await.unwrap();
        assert_eq!(usd.in_sats, 1500.0);
        currencies.get_by_id("EUR").await.unwrap();
        currencies.currencies().await.unwrap();

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_rates_are_refetched() {
        let source = CountingSource::new();
        let currencies = service(source.clone(), 0, 0);

        currencies.rates().await.unwrap();
        currencies.rates().await.unwrap();

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_rates_are_served_while_refreshing() {
        let source = Arc::new(DriftingSource {
            calls: AtomicUsize::new(0),
        });
        let currencies = CurrencyService::new(
            source.clone(),
            Duration::from_millis(50),
            Duration::from_secs(10),
        );

        assert_eq!(currencies.get_by_id("USD").await.unwrap().in_sats, 1000.0);
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Past the fresh TTL but inside the soft one: old table, refresh in background
        assert_eq!(currencies.get_by_id("USD").await.unwrap().in_sats, 1000.0);
        assert_eq!(currencies.get_by_id("USD").await.unwrap().in_sats, 1000.0);

        let mut refreshed = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let usd = currencies.get_by_id("USD").await.unwrap().in_sats;
            if usd != 1000.0 {
                refreshed = Some(usd);
                break;
            }
        }
        assert_eq!(refreshed, Some(1001.0));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_currency_list_contains_sat() {
        let currencies = service(CountingSource::new(), 10, 600);
        let list = currencies.currencies().await.unwrap();
        assert_eq!(list, vec!["EUR", "SAT", "USD"]);
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let currencies = service(Arc::new(FailingSource), 10, 600);
        assert!(matches!(
            currencies.get_by_id("USD").await,
            Err(CurrencyError::Source(_))
        ));
    }

    #[test]
    fn test_tickers_convert_price_per_btc() {
        let mut tickers = HashMap::new();
        tickers.insert("USD".to_string(), Ticker { last: 50_000.0 });
        tickers.insert("BAD".to_string(), Ticker { last: 0.0 });

        let rates = tickers_to_rates(tickers);
        assert_eq!(rates.get("USD"), Some(&2000.0));
        assert!(!rates.contains_key("BAD"));
    }
}
