use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use production_value_scanner::domain::{
    aggregate, compare_build_or_buy, evaluate_job, expand_direct, expand_full, leaves,
    rank_opportunities, sort_opportunities, CancellationFlag, Decision, Efficiency,
    EfficiencyPlan, ExpansionNode, MarketChoice, OpportunityFilter, OpportunitySort,
    PriceProvider, ProductionJob, ProfitabilityResult, RankingOptions, RecipeProvider,
    RegionPreference,
};
use production_value_scanner::infra::{
    cache::DatasetCacheStore, dataset::RecipeBook, market::MarketClient, price_sheet::PriceSheet,
};
use production_value_scanner::util::{
    logging::init_tracing,
    persistence::{load_settings, save_settings, settings_file, Settings},
    version::{version_label, APP_NAME},
};

#[derive(Parser)]
#[command(name = "production_value_scanner", version, about)]
struct Cli {
    /// Recipe dataset JSON. Defaults to the market API's reference dataset.
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    /// Price sheet JSON for offline evaluation. Defaults to live market prices.
    #[arg(long, global = true)]
    prices: Option<PathBuf>,
    #[arg(long, global = true)]
    market_url: Option<String>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Materials consumed directly by a job.
    Direct {
        item: String,
        #[arg(long, default_value_t = 1)]
        runs: u64,
        #[arg(long)]
        efficiency: Option<u8>,
    },
    /// Full production tree of a job.
    Expand(JobArgs),
    /// Aggregated materials of a job.
    Materials {
        #[command(flatten)]
        job: JobArgs,
        /// Include intermediates, not just the shopping list.
        #[arg(long)]
        all: bool,
    },
    /// Cost, profit and ROI of a job.
    Evaluate {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        market: MarketArgs,
    },
    /// Compare building each intermediate against buying it.
    BuildOrBuy {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        market: MarketArgs,
    },
    /// Rank candidates by ROI.
    Rank(RankArgs),
    /// Show the effective settings.
    Settings {
        /// Write the effective settings to the config file.
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct JobArgs {
    item: String,
    #[arg(long, default_value_t = 1)]
    runs: u64,
    /// Efficiency level (0-10) for every job.
    #[arg(long)]
    efficiency: Option<u8>,
    /// Efficiency override for the jobs at one depth, as DEPTH=LEVEL.
    #[arg(long = "tier-efficiency", value_parser = parse_tier_efficiency)]
    tier_efficiency: Vec<(u32, u8)>,
    #[arg(long)]
    max_depth: Option<u32>,
}

#[derive(Args)]
struct MarketArgs {
    /// Region to buy materials in, or "cheapest".
    #[arg(long)]
    region: Option<RegionPreference>,
    #[arg(long)]
    sell_region: Option<String>,
}

#[derive(Args)]
struct RankArgs {
    /// Candidate items. Defaults to every manufacturable item.
    items: Vec<String>,
    #[arg(long, default_value_t = 1)]
    runs: u64,
    #[arg(long)]
    efficiency: Option<u8>,
    /// Efficiency override for the jobs at one depth, as DEPTH=LEVEL.
    #[arg(long = "tier-efficiency", value_parser = parse_tier_efficiency)]
    tier_efficiency: Vec<(u32, u8)>,
    #[arg(long)]
    max_depth: Option<u32>,
    #[command(flatten)]
    market: MarketArgs,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    min_roi: Option<f64>,
    #[arg(long)]
    min_profit: Option<f64>,
    #[arg(long)]
    max_investment: Option<f64>,
    #[arg(long)]
    exclude_truncated: bool,
    #[arg(long, value_enum, default_value_t = SortKey::Roi)]
    sort: SortKey,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortKey {
    Roi,
    Profit,
    Margin,
    Investment,
    Value,
}

impl From<SortKey> for OpportunitySort {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Roi => Self::RoiPercent,
            SortKey::Profit => Self::Profit,
            SortKey::Margin => Self::MarginPercent,
            SortKey::Investment => Self::Investment,
            SortKey::Value => Self::OutputValue,
        }
    }
}

fn parse_tier_efficiency(raw: &str) -> Result<(u32, u8), String> {
    let (depth, level) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected DEPTH=LEVEL, got {raw}"))?;
    let depth = depth.trim().parse().map_err(|_| format!("bad depth: {depth}"))?;
    let level = level.trim().parse().map_err(|_| format!("bad level: {level}"))?;
    Ok((depth, level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(url) = &cli.market_url {
        settings.market_url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    init_tracing(&settings.log_level);

    let sources = Sources::new(&cli, &settings)?;
    match &cli.command {
        Command::Direct {
            item,
            runs,
            efficiency,
        } => {
            let recipes = sources.recipes().await?;
            let efficiency = Efficiency::new(efficiency.unwrap_or(settings.efficiency.level()))?;
            let materials = expand_direct(&recipes, item, *runs, efficiency)?;
            println!("{} x{} at {efficiency}", recipes.display_name(item), runs);
            for material in materials {
                println!(
                    "  {:<32} {:>12}",
                    recipes.display_name(&material.item_id),
                    material.quantity
                );
            }
        }
        Command::Expand(args) => {
            let recipes = sources.recipes().await?;
            let job = job_from(args, &settings)?;
            let tree = expand_full(&recipes, &job.item_id, job.runs, &job.efficiency, job.max_depth)?;
            print_node(&recipes, &tree.root, 0);
            println!(
                "depth {} of {}, job time {}s{}",
                tree.deepest(),
                tree.max_depth,
                tree.total_job_secs(),
                if tree.truncated { ", truncated" } else { "" }
            );
        }
        Command::Materials { job: args, all } => {
            let recipes = sources.recipes().await?;
            let job = job_from(args, &settings)?;
            let tree = expand_full(&recipes, &job.item_id, job.runs, &job.efficiency, job.max_depth)?;
            let mut materials = aggregate(&tree);
            if !all {
                materials = leaves(&materials);
            }
            for material in materials {
                println!(
                    "  T{:<2} {:<32} {:>12}  {}",
                    material.tier,
                    recipes.display_name(&material.item_id),
                    material.quantity,
                    material.kind.label()
                );
            }
        }
        Command::Evaluate { job: args, market } => {
            let recipes = sources.recipes().await?;
            let prices = sources.prices()?;
            let job = job_from(args, &settings)?;
            let market = market_from(market, &settings, prices.as_ref())?;
            match evaluate_job(&recipes, prices.as_ref(), &job, &market).await {
                Ok(result) => print_result(&recipes, &result),
                Err(err) => bail!(err.user_message()),
            }
        }
        Command::BuildOrBuy { job: args, market } => {
            let recipes = sources.recipes().await?;
            let prices = sources.prices()?;
            let job = job_from(args, &settings)?;
            let market = market_from(market, &settings, prices.as_ref())?;
            let tree = expand_full(&recipes, &job.item_id, job.runs, &job.efficiency, job.max_depth)?;
            let comparisons = compare_build_or_buy(&tree, prices.as_ref(), &market.buy_from).await;
            if comparisons.is_empty() {
                println!("no intermediates to compare");
            }
            for comparison in comparisons {
                let decision = match comparison.decision {
                    Decision::Build => "build",
                    Decision::Buy => "buy",
                    Decision::Unpriced => "unpriced",
                };
                println!(
                    "  {:<32} {:>10}  buy {:>14}  build {:>14}  -> {decision}",
                    recipes.display_name(&comparison.item_id),
                    comparison.quantity,
                    format_cost(comparison.buy_cost),
                    format_cost(comparison.build_cost),
                );
            }
        }
        Command::Rank(args) => {
            let recipes = sources.recipes().await?;
            let prices = sources.prices()?;
            run_rank(args, &settings, &recipes, prices.as_ref()).await?;
        }
        Command::Settings { save } => {
            println!("{APP_NAME} {}", version_label());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if *save {
                let path = save_settings(&settings)?;
                println!("saved to {}", path.display());
            } else if let Some(path) = settings_file() {
                println!("config file: {}", path.display());
            }
        }
    }

    Ok(())
}

/// Collaborators chosen by the global flags.
struct Sources {
    dataset: Option<PathBuf>,
    prices: Option<PathBuf>,
    market: MarketClient,
}

impl Sources {
    fn new(cli: &Cli, settings: &Settings) -> Result<Self> {
        let market = MarketClient::with_base_url(&settings.market_url)
            .with_context(|| format!("invalid market URL {}", settings.market_url))?
            .with_ttl(Duration::from_secs(settings.price_ttl_minutes * 60))
            .with_regions(settings.regions.clone())
            .with_dataset_store(DatasetCacheStore::default_location());
        Ok(Self {
            dataset: cli.dataset.clone(),
            prices: cli.prices.clone(),
            market,
        })
    }

    async fn recipes(&self) -> Result<RecipeBook> {
        let book = match &self.dataset {
            Some(path) => RecipeBook::load(path)
                .with_context(|| format!("failed to load dataset {}", path.display()))?,
            None => self
                .market
                .recipe_book()
                .await
                .context("failed to load the reference dataset")?,
        };
        for item in book.miscategorised() {
            tracing::warn!(item = item.id.as_str(), "raw material has a recipe; expanding it anyway");
        }
        Ok(book)
    }

    fn prices(&self) -> Result<Box<dyn PriceProvider>> {
        match &self.prices {
            Some(path) => {
                let sheet = PriceSheet::load(path)
                    .with_context(|| format!("failed to load prices {}", path.display()))?;
                Ok(Box::new(sheet))
            }
            None => Ok(Box::new(self.market.clone())),
        }
    }
}

fn plan_from(efficiency: Option<u8>, tiers: &[(u32, u8)], settings: &Settings) -> Result<EfficiencyPlan> {
    let default = match efficiency {
        Some(level) => Efficiency::new(level)?,
        None => settings.efficiency,
    };
    if tiers.is_empty() {
        return Ok(EfficiencyPlan::Uniform(default));
    }
    let mut overrides = BTreeMap::new();
    for &(depth, level) in tiers {
        overrides.insert(depth, Efficiency::new(level)?);
    }
    Ok(EfficiencyPlan::PerTier {
        default,
        tiers: overrides,
    })
}

fn job_from(args: &JobArgs, settings: &Settings) -> Result<ProductionJob> {
    Ok(ProductionJob {
        item_id: args.item.clone(),
        runs: args.runs,
        efficiency: plan_from(args.efficiency, &args.tier_efficiency, settings)?,
        max_depth: args.max_depth.unwrap_or(settings.max_depth),
    })
}

fn market_from(
    args: &MarketArgs,
    settings: &Settings,
    prices: &dyn PriceProvider,
) -> Result<MarketChoice> {
    let buy_from = args.region.clone().unwrap_or_else(|| settings.region.clone());
    if buy_from == RegionPreference::Cheapest && prices.regions().is_empty() {
        bail!("no market regions to search for the cheapest price; pass --region or list regions in the settings file");
    }
    let sell_region = args
        .sell_region
        .clone()
        .or_else(|| settings.sell_region.clone())
        .or_else(|| match &buy_from {
            RegionPreference::Region(region) => Some(region.clone()),
            RegionPreference::Cheapest => prices.regions().into_iter().next(),
        });
    let Some(sell_region) = sell_region else {
        bail!("no sell region known; pass --sell-region or configure market regions");
    };
    Ok(MarketChoice {
        buy_from,
        sell_region,
    })
}

async fn run_rank(
    args: &RankArgs,
    settings: &Settings,
    recipes: &RecipeBook,
    prices: &dyn PriceProvider,
) -> Result<()> {
    let candidates = if args.items.is_empty() {
        recipes.manufacturable_ids()
    } else {
        args.items.clone()
    };
    let options = RankingOptions {
        runs: args.runs,
        efficiency: plan_from(args.efficiency, &args.tier_efficiency, settings)?,
        max_depth: args.max_depth.unwrap_or(settings.max_depth),
        market: market_from(&args.market, settings, prices)?,
        concurrency: args.concurrency.unwrap_or(settings.concurrency),
        filter: OpportunityFilter {
            min_roi_pct: args.min_roi,
            min_profit: args.min_profit,
            max_investment: args.max_investment,
            exclude_truncated: args.exclude_truncated,
        },
    };

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut report = rank_opportunities(recipes, prices, &candidates, &options, &cancel).await;
    let sort = OpportunitySort::from(args.sort);
    if sort != OpportunitySort::RoiPercent {
        sort_opportunities(&mut report.ranked, sort, true);
    }

    println!(
        "  {:<32} {:>14} {:>14} {:>9} {:>9}",
        "item", "cost", "profit", "margin", sort.label()
    );
    let limit = args.limit.unwrap_or(usize::MAX);
    for result in report.ranked.iter().take(limit) {
        let key = match sort {
            OpportunitySort::RoiPercent => format!("{:.1}%", result.roi_pct),
            OpportunitySort::Profit => format!("{:.2}", result.profit),
            OpportunitySort::MarginPercent => format!("{:.1}%", result.margin_pct),
            OpportunitySort::Investment => format!("{:.2}", result.total_cost),
            OpportunitySort::OutputValue => format!("{:.2}", result.output_value),
        };
        println!(
            "  {:<32} {:>14.2} {:>14.2} {:>8.1}% {:>9}{}",
            recipes.display_name(&result.item_id),
            result.total_cost,
            result.profit,
            result.margin_pct,
            key,
            if result.depth_truncated { "  (truncated)" } else { "" }
        );
    }
    for skipped in &report.skipped {
        println!(
            "  skipped {}: {}",
            recipes.display_name(&skipped.item_id),
            skipped.reason.describe()
        );
    }
    Ok(())
}

fn print_node(recipes: &RecipeBook, node: &ExpansionNode, indent: usize) {
    let runs = if node.runs > 0 {
        format!(" ({} runs)", node.runs)
    } else {
        String::new()
    };
    println!(
        "{:indent$}{} x{}{}  [{}]",
        "",
        recipes.display_name(&node.item_id),
        node.quantity,
        runs,
        node.kind.label(),
        indent = indent * 2
    );
    for child in &node.children {
        print_node(recipes, child, indent + 1);
    }
}

fn print_result(recipes: &RecipeBook, result: &ProfitabilityResult) {
    println!(
        "{} x{} ({} runs)",
        recipes.display_name(&result.item_id),
        result.output_quantity,
        result.runs
    );
    for material in &result.breakdown {
        println!(
            "  {:<32} {:>10} x {:>12.2} @ {:<12} = {:>14.2}",
            recipes.display_name(&material.item_id),
            material.quantity,
            material.unit_price,
            material.region_id,
            material.total
        );
    }
    println!("  cost         {:>14.2}", result.total_cost);
    println!("  output value {:>14.2}", result.output_value);
    println!("  profit       {:>14.2}", result.profit);
    if result.zero_margin {
        println!("  margin       n/a (output is worthless)");
    } else {
        println!("  margin       {:>13.1}%", result.margin_pct);
    }
    println!("  ROI          {:>13.1}%", result.roi_pct);
    if result.depth_truncated {
        println!("  note: expansion hit the depth limit; truncated items are priced as bought");
    }
}

fn format_cost(cost: Option<f64>) -> String {
    cost.map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use production_value_scanner::domain::PriceQuote;

    use super::*;

    fn sell_in(region: Option<&str>) -> MarketArgs {
        MarketArgs {
            region: None,
            sell_region: region.map(str::to_string),
        }
    }

    #[test]
    fn cheapest_buying_without_regions_is_rejected() {
        let err = market_from(&sell_in(Some("jita")), &Settings::default(), &PriceSheet::new())
            .unwrap_err();
        assert!(err.to_string().contains("--region"));
    }

    #[test]
    fn cheapest_buying_sells_in_first_known_region() {
        let prices = PriceSheet::from_quotes([PriceQuote {
            item_id: "gear".into(),
            region_id: "amarr".into(),
            sell_price: 2.0,
            buy_price: 1.8,
            sell_volume: 10,
            updated_at: None,
        }]);
        let market = market_from(&sell_in(None), &Settings::default(), &prices).unwrap();
        assert_eq!(market.buy_from, RegionPreference::Cheapest);
        assert_eq!(market.sell_region, "amarr");
    }

    #[test]
    fn rank_accepts_tier_efficiency() {
        let cli = Cli::try_parse_from([
            "production_value_scanner",
            "rank",
            "widget",
            "--efficiency",
            "2",
            "--tier-efficiency",
            "1=10",
        ])
        .unwrap();
        let Command::Rank(args) = cli.command else {
            panic!("expected rank");
        };
        let plan = plan_from(args.efficiency, &args.tier_efficiency, &Settings::default()).unwrap();
        assert_eq!(plan.for_job(0).level(), 2);
        assert_eq!(plan.for_job(1).level(), 10);
    }
}
