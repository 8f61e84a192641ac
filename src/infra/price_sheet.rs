//! In-memory price source, for offline scans and fixtures.

use std::{collections::HashMap, fs, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ItemId, PriceLookupError, PriceProvider, PriceQuote, RegionId};
use crate::infra::dataset::DatasetError;

#[derive(Debug, Deserialize, Serialize)]
struct PriceSheetFile {
    #[serde(default)]
    quotes: Vec<PriceQuote>,
}

/// Quotes indexed by item, then region. Regions keep insertion order.
#[derive(Clone, Debug, Default)]
pub struct PriceSheet {
    regions: Vec<RegionId>,
    quotes: HashMap<ItemId, HashMap<RegionId, PriceQuote>>,
}

impl PriceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_quotes(quotes: impl IntoIterator<Item = PriceQuote>) -> Self {
        let mut sheet = Self::new();
        for quote in quotes {
            sheet.insert(quote);
        }
        sheet
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let content = fs::read_to_string(path)?;
        let file: PriceSheetFile = serde_json::from_str(&content)?;
        Ok(Self::from_quotes(file.quotes))
    }

    /// Insert or replace the quote for its (item, region).
    pub fn insert(&mut self, quote: PriceQuote) {
        if !self.regions.contains(&quote.region_id) {
            self.regions.push(quote.region_id.clone());
        }
        self.quotes
            .entry(quote.item_id.clone())
            .or_default()
            .insert(quote.region_id.clone(), quote);
    }

    pub fn get(&self, item_id: &str, region_id: &str) -> Option<&PriceQuote> {
        self.quotes.get(item_id).and_then(|regions| regions.get(region_id))
    }

    pub fn len(&self) -> usize {
        self.quotes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PriceProvider for PriceSheet {
    async fn price(
        &self,
        item_id: &str,
        region_id: &str,
    ) -> Result<Option<PriceQuote>, PriceLookupError> {
        Ok(self.get(item_id, region_id).cloned())
    }

    fn regions(&self) -> Vec<RegionId> {
        self.regions.clone()
    }
}
