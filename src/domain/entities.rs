use std::{collections::BTreeMap, fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

use super::error::ExpansionError;

/// Identifier for item types in the reference dataset.
pub type ItemId = String;

/// Identifier for a trade region (market hub).
pub type RegionId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    RawMaterial,
    Manufactured,
}

/// Item metadata. Only used for presentation (names, hauling volume).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Unit volume in m3.
    #[serde(default)]
    pub volume: f64,
    pub category: ItemCategory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeInput {
    pub item_id: ItemId,
    /// Base quantity consumed by one run, before efficiency.
    pub quantity: u64,
}

/// Manufacturing activity producing `output_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub output_id: ItemId,
    pub inputs: Vec<RecipeInput>,
    #[serde(default = "default_output_per_run")]
    pub output_per_run: u64,
    /// Base production time of one run, in seconds.
    #[serde(default)]
    pub base_time_secs: u64,
}

fn default_output_per_run() -> u64 {
    1
}

/// Material efficiency level of a job, 0..=10.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Efficiency(u8);

impl Efficiency {
    pub const MAX: u8 = 10;

    pub fn new(level: u8) -> Result<Self, ExpansionError> {
        if level > Self::MAX {
            return Err(ExpansionError::InvalidEfficiency(level));
        }
        Ok(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Quantity of one run after the discount, floored and never below 1.
    pub fn apply(self, base_quantity: u64) -> u64 {
        let discounted = u128::from(base_quantity) * u128::from(100 - self.0) / 100;
        u64::try_from(discounted).unwrap_or(u64::MAX).max(1)
    }
}

impl TryFrom<u8> for Efficiency {
    type Error = ExpansionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Efficiency> for u8 {
    fn from(value: Efficiency) -> Self {
        value.0
    }
}

impl fmt::Display for Efficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ME{}", self.0)
    }
}

/// Efficiency applied to each job of an expansion, keyed by job depth.
///
/// The root job sits at depth 0, so its direct materials (tier 1) are
/// discounted with `for_job(0)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EfficiencyPlan {
    Uniform(Efficiency),
    PerTier {
        default: Efficiency,
        tiers: BTreeMap<u32, Efficiency>,
    },
}

impl EfficiencyPlan {
    pub fn for_job(&self, depth: u32) -> Efficiency {
        match self {
            Self::Uniform(efficiency) => *efficiency,
            Self::PerTier { default, tiers } => tiers.get(&depth).copied().unwrap_or(*default),
        }
    }
}

impl Default for EfficiencyPlan {
    fn default() -> Self {
        Self::Uniform(Efficiency::default())
    }
}

impl From<Efficiency> for EfficiencyPlan {
    fn from(value: Efficiency) -> Self {
        Self::Uniform(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    /// Has a recipe and was expanded further.
    Manufactured,
    /// No recipe: bought, never built.
    Raw,
    /// Has a recipe, but the depth limit stopped expansion here.
    DepthTruncated,
}

impl MaterialKind {
    pub fn is_leaf(self) -> bool {
        !matches!(self, Self::Manufactured)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Manufactured => "build",
            Self::Raw => "raw",
            Self::DepthTruncated => "truncated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    pub item_id: ItemId,
    pub quantity: u64,
    pub tier: u32,
    pub kind: MaterialKind,
}

/// A market quote for one item in one region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub item_id: ItemId,
    pub region_id: RegionId,
    /// Lowest ask: what a buyer pays.
    pub sell_price: f64,
    /// Highest bid.
    pub buy_price: f64,
    /// Units available on sell orders.
    pub sell_volume: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<SystemTime>,
}

impl PriceQuote {
    /// Sell price usable for purchasing, if there is any supply behind it.
    pub fn purchasable_price(&self) -> Option<f64> {
        Some(self.sell_price).filter(|price| {
            self.sell_volume > 0 && price.is_finite() && *price > 0.0
        })
    }
}

/// Where materials are bought.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionPreference {
    /// Best price across every region the price provider knows.
    #[default]
    Cheapest,
    Region(RegionId),
}

impl FromStr for RegionPreference {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("cheapest") {
            Ok(Self::Cheapest)
        } else {
            Ok(Self::Region(trimmed.to_string()))
        }
    }
}

impl fmt::Display for RegionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cheapest => f.write_str("cheapest"),
            Self::Region(region) => f.write_str(region),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialCost {
    pub item_id: ItemId,
    pub quantity: u64,
    pub unit_price: f64,
    pub region_id: RegionId,
    pub total: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub materials: Vec<MaterialCost>,
    pub total_cost: f64,
}

/// Parameters of one production job to evaluate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionJob {
    pub item_id: ItemId,
    pub runs: u64,
    pub efficiency: EfficiencyPlan,
    pub max_depth: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilityResult {
    pub item_id: ItemId,
    pub runs: u64,
    pub output_quantity: u64,
    pub output_unit_price: f64,
    pub total_cost: f64,
    pub output_value: f64,
    pub profit: f64,
    pub margin_pct: f64,
    pub roi_pct: f64,
    /// Output had no market value, so the margin was reported as 0.
    pub zero_margin: bool,
    /// The expansion behind this result was cut short by the depth limit.
    pub depth_truncated: bool,
    pub breakdown: Vec<MaterialCost>,
}
