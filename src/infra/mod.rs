pub mod cache;
pub mod dataset;
pub mod market;
pub mod price_sheet;
