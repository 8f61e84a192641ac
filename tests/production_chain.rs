use std::io::Write;

use production_value_scanner::domain::{
    aggregate, compare_build_or_buy, evaluate_job, expand_full, leaves, rank_opportunities,
    CancellationFlag, Decision, EfficiencyPlan, EvaluationError, MaterialKind, MarketChoice,
    OpportunityFilter, ProductionJob, RankingOptions, RegionPreference, SkipReason,
};
use production_value_scanner::infra::{
    dataset::RecipeBook, market::MarketClient, price_sheet::PriceSheet,
};
use serde_json::json;
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DATASET: &str = r#"{
    "version": "test-1",
    "items": [
        {"id": "gear", "name": "Gear", "category": "raw_material"},
        {"id": "plate", "name": "Plate", "category": "manufactured"},
        {"id": "widget", "name": "Widget", "category": "manufactured"},
        {"id": "turret", "name": "Turret", "category": "manufactured"}
    ],
    "recipes": [
        {"output_id": "plate", "inputs": [{"item_id": "gear", "quantity": 2}], "output_per_run": 5},
        {"output_id": "widget", "inputs": [
            {"item_id": "gear", "quantity": 10},
            {"item_id": "plate", "quantity": 5}
        ]},
        {"output_id": "turret", "inputs": [
            {"item_id": "widget", "quantity": 2},
            {"item_id": "plate", "quantity": 4}
        ]}
    ]
}"#;

const PRICES: &str = r#"{"quotes": [
    {"item_id": "gear", "region_id": "jita", "sell_price": 2.0, "buy_price": 1.9, "sell_volume": 10000},
    {"item_id": "plate", "region_id": "jita", "sell_price": 9.0, "buy_price": 8.5, "sell_volume": 300},
    {"item_id": "widget", "region_id": "jita", "sell_price": 100.0, "buy_price": 95.0, "sell_volume": 40},
    {"item_id": "turret", "region_id": "jita", "sell_price": 400.0, "buy_price": 380.0, "sell_volume": 3}
]}"#;

fn load_fixtures() -> (RecipeBook, PriceSheet) {
    let mut dataset = tempfile::NamedTempFile::new().unwrap();
    dataset.write_all(DATASET.as_bytes()).unwrap();
    let mut prices = tempfile::NamedTempFile::new().unwrap();
    prices.write_all(PRICES.as_bytes()).unwrap();

    (
        RecipeBook::load(dataset.path()).unwrap(),
        PriceSheet::load(prices.path()).unwrap(),
    )
}

fn turret_job() -> ProductionJob {
    ProductionJob {
        item_id: "turret".into(),
        runs: 1,
        efficiency: EfficiencyPlan::default(),
        max_depth: 10,
    }
}

fn jita() -> MarketChoice {
    MarketChoice {
        buy_from: RegionPreference::Cheapest,
        sell_region: "jita".into(),
    }
}

#[test]
fn three_level_chain_aggregates_across_branches() {
    let (recipes, _) = load_fixtures();
    let job = turret_job();
    let tree = expand_full(&recipes, &job.item_id, job.runs, &job.efficiency, job.max_depth).unwrap();

    assert_eq!(tree.deepest(), 3);
    assert!(!tree.truncated);

    let totals: Vec<_> = aggregate(&tree)
        .into_iter()
        .map(|m| (m.item_id, m.quantity, m.tier, m.kind))
        .collect();
    assert_eq!(
        totals,
        vec![
            ("plate".to_string(), 14, 1, MaterialKind::Manufactured),
            ("widget".to_string(), 2, 1, MaterialKind::Manufactured),
            ("gear".to_string(), 26, 2, MaterialKind::Raw),
        ]
    );
}

#[test]
fn depth_limit_buys_deep_intermediates() {
    let (recipes, _) = load_fixtures();
    let tree = expand_full(&recipes, "turret", 1, &EfficiencyPlan::default(), 1).unwrap();

    assert!(tree.truncated);
    let shopping: Vec<_> = leaves(&aggregate(&tree))
        .into_iter()
        .map(|m| (m.item_id, m.quantity, m.kind))
        .collect();
    assert_eq!(
        shopping,
        vec![
            ("plate".to_string(), 4, MaterialKind::DepthTruncated),
            ("widget".to_string(), 2, MaterialKind::DepthTruncated),
        ]
    );
}

#[tokio::test]
async fn turret_is_profitable_from_files() {
    let (recipes, prices) = load_fixtures();
    let result = evaluate_job(&recipes, &prices, &turret_job(), &jita())
        .await
        .unwrap();

    assert_eq!(result.total_cost, 52.0);
    assert_eq!(result.output_value, 400.0);
    assert_eq!(result.profit, 348.0);
    assert!((result.roi_pct - 669.230_769).abs() < 1e-3);
    assert!((result.margin_pct - 87.0).abs() < 1e-9);
}

#[tokio::test]
async fn building_intermediates_beats_buying_them() {
    let (recipes, prices) = load_fixtures();
    let tree = expand_full(&recipes, "turret", 1, &EfficiencyPlan::default(), 10).unwrap();
    let comparisons = compare_build_or_buy(&tree, &prices, &RegionPreference::Cheapest).await;

    let summary: Vec<_> = comparisons
        .iter()
        .map(|c| (c.item_id.as_str(), c.quantity, c.buy_cost, c.build_cost, c.decision))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("widget", 2, Some(200.0), Some(48.0), Decision::Build),
            ("plate", 14, Some(126.0), Some(12.0), Decision::Build),
        ]
    );
}

#[tokio::test]
async fn ranking_over_http_skips_unpriced_output() {
    let server = MockServer::start().await;
    let quote = |item: &str, price: f64| {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "data": {"item_id": item, "region_id": "jita", "sell_price": price, "sell_volume": 500}
        }))
    };
    Mock::given(path("/prices"))
        .and(query_param("item_id", "gear"))
        .respond_with(quote("gear", 2.0))
        .mount(&server)
        .await;
    Mock::given(path("/prices"))
        .and(query_param("item_id", "widget"))
        .respond_with(quote("widget", 100.0))
        .mount(&server)
        .await;
    Mock::given(path("/prices"))
        .and(query_param("item_id", "plate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "data": null})))
        .mount(&server)
        .await;

    let (recipes, _) = load_fixtures();
    let market = MarketClient::with_base_url(&format!("{}/", server.uri()))
        .unwrap()
        .with_regions(vec!["jita".into()]);
    let options = RankingOptions {
        runs: 1,
        efficiency: EfficiencyPlan::default(),
        max_depth: 10,
        market: jita(),
        concurrency: 4,
        filter: OpportunityFilter::default(),
    };
    let candidates = vec!["widget".to_string(), "plate".to_string()];

    let report =
        rank_opportunities(&recipes, &market, &candidates, &options, &CancellationFlag::new())
            .await;

    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.ranked[0].item_id, "widget");
    assert_eq!(report.ranked[0].total_cost, 24.0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(
        report.skipped[0].reason,
        SkipReason::Failed(EvaluationError::OutputUnpriced("plate".into()))
    );
}
