use thiserror::Error;

use super::entities::ItemId;

/// Failures that abort a whole expansion call. There is no partial tree.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("unknown item: {0}")]
    UnknownItem(ItemId),
    #[error("cyclic recipe: {}", .chain.join(" -> "))]
    CyclicRecipe { chain: Vec<ItemId> },
    #[error("runs must be at least 1, got {0}")]
    InvalidRuns(u64),
    #[error("efficiency must be between 0 and 10, got {0}")]
    InvalidEfficiency(u8),
    #[error("depth limit must be at least 1")]
    InvalidDepthLimit,
}

/// Failures that abort the evaluation of a single candidate.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EvaluationError {
    #[error("no priced supply for material {0}")]
    MaterialUnavailable(ItemId),
    #[error("no market price for output {0}")]
    OutputUnpriced(ItemId),
    #[error("ROI is undefined for a zero material cost")]
    UndefinedRoi,
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
}

impl EvaluationError {
    /// Message suitable for showing next to the item in a listing.
    pub fn user_message(&self) -> String {
        match self {
            Self::MaterialUnavailable(item) => {
                format!("cannot price this item: no market supply for {item}")
            }
            Self::OutputUnpriced(item) => format!("cannot price this item: {item} has no sell orders"),
            Self::UndefinedRoi => "cannot price this item: it needs no purchased materials".to_string(),
            Self::Expansion(err) => format!("cannot resolve production chain: {err}"),
        }
    }
}

/// Failure of a single price lookup. Evaluation treats it as missing data.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PriceLookupError {
    #[error("price lookup timed out")]
    Timeout,
    #[error("price source unavailable: {0}")]
    Unavailable(String),
}
