//! Read-only collaborators the resolver depends on.

use async_trait::async_trait;

use super::{
    entities::{Item, PriceQuote, Recipe, RegionId},
    error::PriceLookupError,
};

/// Static manufacturing reference data.
pub trait RecipeProvider: Send + Sync {
    /// Recipe producing `item_id`, or `None` for raw materials and unknown ids.
    fn recipe(&self, item_id: &str) -> Option<&Recipe>;

    fn item(&self, item_id: &str) -> Option<&Item>;

    /// Display name, falling back to the id.
    fn display_name(&self, item_id: &str) -> String {
        self.item(item_id)
            .map(|item| item.name.clone())
            .unwrap_or_else(|| item_id.to_string())
    }
}

/// Regional market prices. Implementations may hit the network.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// `Ok(None)` means the region has no orders for the item.
    async fn price(
        &self,
        item_id: &str,
        region_id: &str,
    ) -> Result<Option<PriceQuote>, PriceLookupError>;

    /// Every trade region this provider can quote, in preference order.
    fn regions(&self) -> Vec<RegionId>;
}
