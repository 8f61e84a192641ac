//! Material costing, profitability and batch ranking.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::{
    bom::{aggregate, aggregate_subtree, expand_full, leaves, ExpansionTree},
    entities::{
        CostBreakdown, EfficiencyPlan, ItemId, MaterialCost, MaterialKind, MaterialRequirement,
        ProductionJob, ProfitabilityResult, RegionId, RegionPreference,
    },
    error::EvaluationError,
    opportunity::{compare_ranked, OpportunityFilter},
    providers::{PriceProvider, RecipeProvider},
};

/// Price every material, either in one region or at the cheapest region.
pub async fn evaluate_cost<P>(
    materials: &[MaterialRequirement],
    prices: &P,
    preference: &RegionPreference,
) -> Result<CostBreakdown, EvaluationError>
where
    P: PriceProvider + ?Sized,
{
    let regions = match preference {
        RegionPreference::Region(region) => vec![region.clone()],
        RegionPreference::Cheapest => prices.regions(),
    };
    if regions.is_empty() && !materials.is_empty() {
        tracing::warn!("price provider knows no regions; every material will be unavailable");
    }

    let mut breakdown = CostBreakdown::default();
    for material in materials {
        let (region_id, unit_price) = best_offer(prices, &material.item_id, &regions)
            .await
            .ok_or_else(|| EvaluationError::MaterialUnavailable(material.item_id.clone()))?;
        let total = unit_price * material.quantity as f64;
        breakdown.total_cost += total;
        breakdown.materials.push(MaterialCost {
            item_id: material.item_id.clone(),
            quantity: material.quantity,
            unit_price,
            region_id,
            total,
        });
    }

    Ok(breakdown)
}

async fn best_offer<P>(prices: &P, item_id: &str, regions: &[RegionId]) -> Option<(RegionId, f64)>
where
    P: PriceProvider + ?Sized,
{
    let mut best: Option<(RegionId, f64)> = None;
    for region in regions {
        match prices.price(item_id, region).await {
            Ok(Some(quote)) => {
                let Some(price) = quote.purchasable_price() else {
                    continue;
                };
                if best.as_ref().map(|(_, current)| price < *current).unwrap_or(true) {
                    best = Some((region.clone(), price));
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    item = item_id,
                    region = region.as_str(),
                    error = %err,
                    "price lookup failed; treating region as unpriced"
                );
            }
        }
    }
    best
}

/// Profit, margin and ROI of a job whose output sells at `output_unit_price`.
pub fn profitability(
    job: &ProductionJob,
    output_per_run: u64,
    output_unit_price: f64,
    cost: CostBreakdown,
) -> Result<ProfitabilityResult, EvaluationError> {
    let total_cost = cost.total_cost;
    if total_cost == 0.0 {
        return Err(EvaluationError::UndefinedRoi);
    }

    let output_quantity = job.runs.saturating_mul(output_per_run);
    let output_value = output_unit_price * output_quantity as f64;
    let profit = output_value - total_cost;
    let zero_margin = output_value == 0.0;
    let margin_pct = if zero_margin {
        0.0
    } else {
        profit / output_value * 100.0
    };
    let roi_pct = profit / total_cost * 100.0;

    Ok(ProfitabilityResult {
        item_id: job.item_id.clone(),
        runs: job.runs,
        output_quantity,
        output_unit_price,
        total_cost,
        output_value,
        profit,
        margin_pct,
        roi_pct,
        zero_margin,
        depth_truncated: false,
        breakdown: cost.materials,
    })
}

/// Look up the output's sell price in `sell_region`, then compute profitability.
pub async fn evaluate_profitability<P>(
    job: &ProductionJob,
    output_per_run: u64,
    cost: CostBreakdown,
    prices: &P,
    sell_region: &str,
) -> Result<ProfitabilityResult, EvaluationError>
where
    P: PriceProvider + ?Sized,
{
    let unit_price = match prices.price(&job.item_id, sell_region).await {
        Ok(Some(quote)) if quote.sell_price.is_finite() && quote.sell_price >= 0.0 => {
            quote.sell_price
        }
        Ok(_) => return Err(EvaluationError::OutputUnpriced(job.item_id.clone())),
        Err(err) => {
            tracing::warn!(
                item = job.item_id.as_str(),
                region = sell_region,
                error = %err,
                "output price lookup failed"
            );
            return Err(EvaluationError::OutputUnpriced(job.item_id.clone()));
        }
    };
    profitability(job, output_per_run, unit_price, cost)
}

/// Where materials are bought and where the output is sold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketChoice {
    pub buy_from: RegionPreference,
    pub sell_region: RegionId,
}

/// Expand, aggregate, cost and evaluate a single job.
pub async fn evaluate_job<R, P>(
    recipes: &R,
    prices: &P,
    job: &ProductionJob,
    market: &MarketChoice,
) -> Result<ProfitabilityResult, EvaluationError>
where
    R: RecipeProvider + ?Sized,
    P: PriceProvider + ?Sized,
{
    let tree = expand_full(recipes, &job.item_id, job.runs, &job.efficiency, job.max_depth)?;
    let shopping_list = leaves(&aggregate(&tree));
    let cost = evaluate_cost(&shopping_list, prices, &market.buy_from).await?;
    let output_per_run = recipes
        .recipe(&job.item_id)
        .map(|recipe| recipe.output_per_run)
        .unwrap_or(1);
    let mut result =
        evaluate_profitability(job, output_per_run, cost, prices, &market.sell_region).await?;
    result.depth_truncated = tree.truncated;
    Ok(result)
}

/// Cooperative cancellation shared between a batch and its caller.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingOptions {
    pub runs: u64,
    pub efficiency: EfficiencyPlan,
    pub max_depth: u32,
    pub market: MarketChoice,
    /// Candidates evaluated at the same time. Zero is treated as one.
    pub concurrency: usize,
    #[serde(default)]
    pub filter: OpportunityFilter,
}

impl RankingOptions {
    fn job_for(&self, item_id: &str) -> ProductionJob {
        ProductionJob {
            item_id: item_id.to_string(),
            runs: self.runs,
            efficiency: self.efficiency.clone(),
            max_depth: self.max_depth,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    Failed(EvaluationError),
    Filtered,
    Cancelled,
}

impl SkipReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Failed(err) => err.user_message(),
            Self::Filtered => "outside filter bounds".to_string(),
            Self::Cancelled => "cancelled before evaluation".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SkippedCandidate {
    pub item_id: ItemId,
    pub reason: SkipReason,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankingReport {
    pub ranked: Vec<ProfitabilityResult>,
    pub skipped: Vec<SkippedCandidate>,
}

/// Evaluate every candidate independently and rank the ones that priced.
///
/// At most `options.concurrency` candidates are in flight. A candidate that
/// fails is recorded in `skipped` and the batch continues; once `cancel` is
/// set, candidates that have not started are skipped as cancelled.
pub async fn rank_opportunities<R, P>(
    recipes: &R,
    prices: &P,
    candidates: &[ItemId],
    options: &RankingOptions,
    cancel: &CancellationFlag,
) -> RankingReport
where
    R: RecipeProvider + ?Sized,
    P: PriceProvider + ?Sized,
{
    let outcomes: Vec<(ItemId, Result<ProfitabilityResult, SkipReason>)> =
        stream::iter(candidates.iter())
            .map(|item_id| async move {
                if cancel.is_cancelled() {
                    return (item_id.clone(), Err(SkipReason::Cancelled));
                }
                let job = options.job_for(item_id);
                let outcome = evaluate_job(recipes, prices, &job, &options.market)
                    .await
                    .map_err(SkipReason::Failed);
                (item_id.clone(), outcome)
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

    let mut report = RankingReport::default();
    for (item_id, outcome) in outcomes {
        match outcome {
            Ok(result) if options.filter.matches(&result) => report.ranked.push(result),
            Ok(_) => report.skipped.push(SkippedCandidate {
                item_id,
                reason: SkipReason::Filtered,
            }),
            Err(reason) => {
                if let SkipReason::Failed(err) = &reason {
                    tracing::warn!(item = item_id.as_str(), error = %err, "skipping candidate");
                }
                report.skipped.push(SkippedCandidate { item_id, reason });
            }
        }
    }
    report.ranked.sort_by(compare_ranked);
    report.skipped.sort_by(|a, b| a.item_id.cmp(&b.item_id));

    tracing::info!(
        candidates = candidates.len(),
        ranked = report.ranked.len(),
        skipped = report.skipped.len(),
        "ranked build opportunities"
    );
    report
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Build,
    Buy,
    Unpriced,
}

/// Cost of buying an intermediate outright versus building it from its leaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildOrBuy {
    pub item_id: ItemId,
    pub quantity: u64,
    pub buy_cost: Option<f64>,
    pub build_cost: Option<f64>,
    pub decision: Decision,
}

impl BuildOrBuy {
    /// How much the chosen option saves over the other one, when both priced.
    pub fn savings(&self) -> Option<f64> {
        match (self.buy_cost, self.build_cost) {
            (Some(buy), Some(build)) => Some((buy - build).abs()),
            _ => None,
        }
    }
}

/// Compare building against buying for every intermediate of `tree`.
///
/// Intermediates that appear on several branches are compared once with
/// their combined quantity. Results keep the tree's depth-first order.
pub async fn compare_build_or_buy<P>(
    tree: &ExpansionTree,
    prices: &P,
    preference: &RegionPreference,
) -> Vec<BuildOrBuy>
where
    P: PriceProvider + ?Sized,
{
    let mut intermediates: Vec<(ItemId, u64, Vec<MaterialRequirement>)> = Vec::new();
    for node in tree
        .nodes()
        .skip(1)
        .filter(|node| node.kind == MaterialKind::Manufactured)
    {
        let subtree = leaves(&aggregate_subtree(node));
        match intermediates.iter_mut().find(|(id, _, _)| *id == node.item_id) {
            Some((_, quantity, materials)) => {
                *quantity = quantity.saturating_add(node.quantity);
                merge_materials(materials, subtree);
            }
            None => intermediates.push((node.item_id.clone(), node.quantity, subtree)),
        }
    }

    let mut comparisons = Vec::with_capacity(intermediates.len());
    for (item_id, quantity, materials) in intermediates {
        let bought = [MaterialRequirement {
            item_id: item_id.clone(),
            quantity,
            tier: 0,
            kind: MaterialKind::Raw,
        }];
        let buy_cost = evaluate_cost(&bought, prices, preference)
            .await
            .ok()
            .map(|cost| cost.total_cost);
        let build_cost = evaluate_cost(&materials, prices, preference)
            .await
            .ok()
            .map(|cost| cost.total_cost);
        let decision = match (buy_cost, build_cost) {
            (Some(buy), Some(build)) if buy < build => Decision::Buy,
            (_, Some(_)) => Decision::Build,
            (Some(_), None) => Decision::Buy,
            (None, None) => Decision::Unpriced,
        };
        comparisons.push(BuildOrBuy {
            item_id,
            quantity,
            buy_cost,
            build_cost,
            decision,
        });
    }
    comparisons
}

fn merge_materials(into: &mut Vec<MaterialRequirement>, from: Vec<MaterialRequirement>) {
    for material in from {
        match into.iter_mut().find(|m| m.item_id == material.item_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(material.quantity),
            None => into.push(material),
        }
    }
}
