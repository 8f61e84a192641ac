//! Thin asynchronous client for the market data API.
//!
//! - Provides typed accessors for per-region price quotes and the reference dataset.
//! - Maintains a 30-minute in-memory price cache with stale fallbacks.
//! - Keeps the reference dataset on disk, revalidated by TTL and version.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::domain::{ItemId, PriceLookupError, PriceProvider, PriceQuote, RegionId};
use crate::infra::cache::{DatasetCache, DatasetCacheStore};
use crate::infra::dataset::{DatasetError, RecipeBook};
use crate::util::version::user_agent;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/";
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MarketClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("api error: {0}")]
    Api(String),
    #[error("reference dataset rejected: {0}")]
    Dataset(#[from] DatasetError),
}

impl From<reqwest::Error> for MarketClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(error)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Cached,
    Stale,
}

#[derive(Clone, Debug)]
pub struct CachedPayload<T> {
    pub data: T,
    pub fetched_at: SystemTime,
    pub status: CacheStatus,
}

impl<T> CachedPayload<T> {
    fn new(data: T, fetched_at: SystemTime, status: CacheStatus) -> Self {
        Self {
            data,
            fetched_at,
            status,
        }
    }
}

type QuoteKey = (ItemId, RegionId);

#[derive(Default)]
struct MarketCache {
    prices: HashMap<QuoteKey, Cached<Option<PriceQuote>>>,
    /// One gate per key; concurrent misses wait for the first fetch.
    fetches: HashMap<QuoteKey, Arc<Mutex<()>>>,
    dataset: Option<DatasetCache>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct MarketClient {
    http: Client,
    base_url: Url,
    cache: Arc<Mutex<MarketCache>>,
    ttl: Duration,
    timeout: Duration,
    regions: Vec<RegionId>,
    store: Option<DatasetCacheStore>,
}

impl MarketClient {
    pub fn with_base_url(base: &str) -> Result<Self, MarketClientError> {
        let base_url = Url::parse(base)?;
        let http = Client::builder().user_agent(user_agent()).build()?;
        Ok(Self {
            http,
            base_url,
            cache: Arc::new(Mutex::new(MarketCache::default())),
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            regions: Vec::new(),
            store: None,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Regions searched when buying at the cheapest price.
    pub fn with_regions(mut self, regions: Vec<RegionId>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_dataset_store(mut self, store: DatasetCacheStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Current quote for an item in a region. `data` is `None` when the
    /// region has no orders for it.
    pub async fn get_price(
        &self,
        item_id: &str,
        region_id: &str,
    ) -> Result<CachedPayload<Option<PriceQuote>>, MarketClientError> {
        let key = (item_id.to_string(), region_id.to_string());
        if let Some(payload) = self.cached_price(&key).await {
            tracing::debug!(item = item_id, region = region_id, "serving cached price");
            return Ok(payload);
        }

        let gate = self.fetch_gate(&key).await;
        let _fetching = gate.lock().await;
        if let Some(payload) = self.cached_price(&key).await {
            tracing::debug!(item = item_id, region = region_id, "price fetched by concurrent lookup");
            return Ok(payload);
        }

        let mut url = self.url("prices")?;
        url.query_pairs_mut()
            .append_pair("item_id", item_id)
            .append_pair("region_id", region_id);

        match self.fetch_envelope::<PriceDto>(self.get(url)).await {
            Ok(dto) => {
                let quote = dto.and_then(|dto| dto.into_quote(item_id, region_id));
                Ok(self.store_price(key, quote).await)
            }
            Err(error) => {
                if let Some(stale) = self.cached_price_stale(&key).await {
                    tracing::warn!(
                        item = item_id,
                        region = region_id,
                        %error,
                        "price lookup failed, serving stale quote"
                    );
                    return Ok(stale);
                }
                Err(error)
            }
        }
    }

    /// Load the reference dataset with TTL + version check.
    /// Refreshes if: no copy is held, the disk copy expired (>7 days) or the dataset version changed.
    pub async fn reference_dataset(&self) -> Result<DatasetCache, MarketClientError> {
        {
            let cache = self.cache.lock().await;
            if let Some(ref dataset) = cache.dataset {
                tracing::debug!(
                    version = dataset.dataset_version.as_str(),
                    age = dataset.age_string().as_str(),
                    "using in-memory dataset"
                );
                return Ok(dataset.clone());
            }
        }

        if let Some(disk_cache) = self.store.as_ref().and_then(DatasetCacheStore::load) {
            if disk_cache.is_expired() {
                tracing::info!(
                    age = disk_cache.age_string().as_str(),
                    "dataset cache expired, refreshing"
                );
                return self.refresh_dataset().await;
            }

            let current_version = self.fetch_dataset_version().await?;
            if disk_cache.dataset_version == current_version {
                tracing::debug!(
                    version = current_version.as_str(),
                    age = disk_cache.age_string().as_str(),
                    "dataset disk cache valid"
                );
                self.cache.lock().await.dataset = Some(disk_cache.clone());
                return Ok(disk_cache);
            }
            tracing::info!(
                cached = disk_cache.dataset_version.as_str(),
                current = current_version.as_str(),
                "dataset version changed, refreshing"
            );
        }

        self.refresh_dataset().await
    }

    /// Force a dataset download, bypassing every cache.
    pub async fn refresh_dataset(&self) -> Result<DatasetCache, MarketClientError> {
        let version = self.fetch_dataset_version().await?;
        let url = self.url("dataset")?;
        let dataset = self.fetch_data(self.get(url)).await?;

        let cache = DatasetCache::new(version, dataset);
        tracing::info!(
            version = cache.dataset_version.as_str(),
            items = cache.dataset.items.len(),
            recipes = cache.dataset.recipes.len(),
            "downloaded reference dataset"
        );

        if let Some(store) = &self.store {
            if let Err(error) = store.save(&cache) {
                tracing::warn!(%error, "failed to save dataset cache");
            }
        }
        self.cache.lock().await.dataset = Some(cache.clone());

        Ok(cache)
    }

    /// Reference dataset, validated into a recipe book.
    pub async fn recipe_book(&self) -> Result<RecipeBook, MarketClientError> {
        let cache = self.reference_dataset().await?;
        Ok(RecipeBook::from_dataset(cache.dataset)?)
    }

    async fn fetch_dataset_version(&self) -> Result<String, MarketClientError> {
        let url = self.url("dataset/version")?;
        let version: DatasetVersionDto = self.fetch_data(self.get(url)).await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn fetch_gate(&self, key: &QuoteKey) -> Arc<Mutex<()>> {
        let mut cache = self.cache.lock().await;
        cache.fetches.entry(key.clone()).or_default().clone()
    }

    async fn cached_price(&self, key: &QuoteKey) -> Option<CachedPayload<Option<PriceQuote>>> {
        let cache = self.cache.lock().await;
        cache.prices.get(key).and_then(|entry| entry.if_fresh(self.ttl))
    }

    async fn cached_price_stale(&self, key: &QuoteKey) -> Option<CachedPayload<Option<PriceQuote>>> {
        let cache = self.cache.lock().await;
        cache.prices.get(key).map(Cached::stale)
    }

    async fn store_price(
        &self,
        key: QuoteKey,
        quote: Option<PriceQuote>,
    ) -> CachedPayload<Option<PriceQuote>> {
        let fetched_at = SystemTime::now();
        let payload = CachedPayload::new(quote.clone(), fetched_at, CacheStatus::Fresh);
        let mut cache = self.cache.lock().await;
        cache.prices.insert(key, Cached::new(quote, fetched_at));
        payload
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.get(url).timeout(self.timeout)
    }

    /// Envelope payload; `Ok(None)` when the API answered but carried no data.
    async fn fetch_envelope<T>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Option<T>, MarketClientError>
    where
        T: DeserializeOwned,
    {
        let response = builder.send().await?.error_for_status()?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        let ApiEnvelope {
            status,
            data,
            message,
        } = envelope;

        if status.eq_ignore_ascii_case("ok") {
            Ok(data)
        } else {
            Err(MarketClientError::Api(message.unwrap_or(status)))
        }
    }

    async fn fetch_data<T>(&self, builder: reqwest::RequestBuilder) -> Result<T, MarketClientError>
    where
        T: DeserializeOwned,
    {
        self.fetch_envelope(builder)
            .await?
            .ok_or_else(|| MarketClientError::Api("response missing data".into()))
    }

    fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

#[async_trait]
impl PriceProvider for MarketClient {
    async fn price(
        &self,
        item_id: &str,
        region_id: &str,
    ) -> Result<Option<PriceQuote>, PriceLookupError> {
        match self.get_price(item_id, region_id).await {
            Ok(payload) => Ok(payload.data),
            Err(MarketClientError::Timeout) => Err(PriceLookupError::Timeout),
            Err(error) => Err(PriceLookupError::Unavailable(error.to_string())),
        }
    }

    fn regions(&self) -> Vec<RegionId> {
        self.regions.clone()
    }
}

struct Cached<T> {
    value: T,
    fetched_at: SystemTime,
}

impl<T: Clone> Cached<T> {
    fn new(value: T, fetched_at: SystemTime) -> Self {
        Self { value, fetched_at }
    }

    fn if_fresh(&self, ttl: Duration) -> Option<CachedPayload<T>> {
        if self
            .fetched_at
            .elapsed()
            .map(|elapsed| elapsed < ttl)
            .unwrap_or(false)
        {
            Some(CachedPayload::new(
                self.value.clone(),
                self.fetched_at,
                CacheStatus::Cached,
            ))
        } else {
            None
        }
    }

    fn stale(&self) -> CachedPayload<T> {
        CachedPayload::new(self.value.clone(), self.fetched_at, CacheStatus::Stale)
    }
}

#[derive(Debug, Deserialize)]
struct PriceDto {
    #[serde(default, deserialize_with = "optional_string_from_json")]
    item_id: Option<String>,
    #[serde(default, deserialize_with = "optional_string_from_json")]
    region_id: Option<String>,
    #[serde(default)]
    sell_price: Option<f64>,
    #[serde(default)]
    buy_price: Option<f64>,
    #[serde(default)]
    sell_volume: Option<u64>,
    #[serde(default, alias = "dateModified")]
    date_modified: Option<i64>,
    #[serde(default, alias = "updatedAt")]
    updated_at: Option<String>,
}

impl PriceDto {
    /// No sell price means nobody is selling; the region has no usable quote.
    fn into_quote(self, item_id: &str, region_id: &str) -> Option<PriceQuote> {
        let sell_price = self.sell_price?;
        Some(PriceQuote {
            item_id: self.item_id.unwrap_or_else(|| item_id.to_string()),
            region_id: self.region_id.unwrap_or_else(|| region_id.to_string()),
            sell_price,
            buy_price: self.buy_price.unwrap_or(0.0),
            sell_volume: self.sell_volume.unwrap_or(0),
            updated_at: parse_timestamp_fields(self.date_modified, self.updated_at),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DatasetVersionDto {
    #[serde(default)]
    version: Option<String>,
}

fn parse_timestamp_str(raw: &str) -> Option<SystemTime> {
    let dt = OffsetDateTime::parse(raw, &Rfc3339).ok()?;
    if dt.unix_timestamp() < 0 {
        return None;
    }
    SystemTime::UNIX_EPOCH
        .checked_add(Duration::from_secs(dt.unix_timestamp() as u64))
        .and_then(|time| time.checked_add(Duration::from_nanos(dt.nanosecond() as u64)))
}

fn parse_timestamp_fields(epoch: Option<i64>, iso: Option<String>) -> Option<SystemTime> {
    if let Some(secs) = epoch {
        if secs >= 0 {
            return Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64));
        }
    }
    iso.as_deref().and_then(parse_timestamp_str)
}

fn optional_string_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> serde::de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string, number or null")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
