//! Filtering and alternative orderings over evaluated build opportunities.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::entities::ProfitabilityResult;

/// Sorting options for ranked opportunities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunitySort {
    #[default]
    RoiPercent,
    Profit,
    MarginPercent,
    Investment,
    OutputValue,
}

impl OpportunitySort {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RoiPercent => "ROI %",
            Self::Profit => "Profit",
            Self::MarginPercent => "Margin %",
            Self::Investment => "Investment",
            Self::OutputValue => "Output value",
        }
    }

    fn key(&self, result: &ProfitabilityResult) -> f64 {
        match self {
            Self::RoiPercent => result.roi_pct,
            Self::Profit => result.profit,
            Self::MarginPercent => result.margin_pct,
            Self::Investment => result.total_cost,
            Self::OutputValue => result.output_value,
        }
    }
}

/// Filter options for ranked opportunities. Unset bounds match everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    pub min_roi_pct: Option<f64>,
    pub min_profit: Option<f64>,
    pub max_investment: Option<f64>,
    #[serde(default)]
    pub exclude_truncated: bool,
}

impl OpportunityFilter {
    pub fn matches(&self, result: &ProfitabilityResult) -> bool {
        if let Some(min) = self.min_roi_pct {
            if result.roi_pct < min { return false; }
        }
        if let Some(min) = self.min_profit {
            if result.profit < min { return false; }
        }
        if let Some(max) = self.max_investment {
            if result.total_cost > max { return false; }
        }
        if self.exclude_truncated && result.depth_truncated { return false; }

        true
    }
}

/// Default ranking order: ROI descending, ties broken by absolute profit.
pub fn compare_ranked(a: &ProfitabilityResult, b: &ProfitabilityResult) -> Ordering {
    b.roi_pct
        .partial_cmp(&a.roi_pct)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.profit.partial_cmp(&a.profit).unwrap_or(Ordering::Equal))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Sort results by the given criteria.
pub fn sort_opportunities(results: &mut [ProfitabilityResult], sort: OpportunitySort, descending: bool) {
    results.sort_by(|a, b| {
        let ord = sort
            .key(a)
            .partial_cmp(&sort.key(b))
            .unwrap_or(Ordering::Equal);
        if descending { ord.reverse() } else { ord }
    });
}
