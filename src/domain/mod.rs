//! Production chain resolution and build economics live here.

pub mod bom;
pub mod economics;
pub mod entities;
pub mod error;
pub mod opportunity;
pub mod providers;

#[cfg(test)]
pub(crate) mod fixtures;

pub use bom::{
    aggregate, aggregate_subtree, expand_direct, expand_full, leaves, ExpansionNode,
    ExpansionTree,
};
pub use economics::{
    compare_build_or_buy, evaluate_cost, evaluate_job, evaluate_profitability, profitability,
    rank_opportunities, BuildOrBuy, CancellationFlag, Decision, MarketChoice, RankingOptions,
    RankingReport, SkipReason, SkippedCandidate,
};
pub use entities::{
    CostBreakdown, Efficiency, EfficiencyPlan, Item, ItemCategory, ItemId, MaterialCost,
    MaterialKind, MaterialRequirement, PriceQuote, ProductionJob, ProfitabilityResult, Recipe,
    RecipeInput, RegionId, RegionPreference,
};
pub use error::{EvaluationError, ExpansionError, PriceLookupError};
pub use opportunity::{compare_ranked, sort_opportunities, OpportunityFilter, OpportunitySort};
pub use providers::{PriceProvider, RecipeProvider};
