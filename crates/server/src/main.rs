//! Stratfolio: portfolio construction and walk-forward adaptation
//!
//! Usage:
//!   stratfolio import --input results.json                  — Store results in SQLite
//!   stratfolio adaptive --divisions 5 --strategy-limit 10   — Walk-forward run
//!   stratfolio serve --port 3001                            — Launch the JSON API

mod source;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    aggregate_equal_weight, align_results, annotate_weights, best_per_symbol, optimized_portfolio_report,
    run_adaptive, run_adaptive_tracked, sort_results, AdaptiveProgress, AdaptiveRequest, AdaptiveStatus,
    AdaptiveRun, BacktestResult, OptimalPortfolio, OptimizerConfig, PortfolioReport,
    SortCriterion,
};
use persistence::{Database, PortfolioRunRecord};
use rust_decimal::Decimal;
use serde::Deserialize;
use source::{DatabaseSource, JsonFileSource, ResultSource};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "stratfolio")]
#[command(about = "Portfolio construction and walk-forward adaptation over backtest results", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Annual risk-free rate used for every Sharpe (0.03 = 3%)
    #[arg(long, global = true, default_value_t = engine::sharpe::DEFAULT_RISK_FREE_RATE)]
    risk_free_rate: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import backtest results from a JSON file into the database
    Import {
        #[arg(short, long)]
        input: PathBuf,
        /// Remove previously imported results first
        #[arg(long)]
        replace: bool,
    },
    /// Per-result summary and the equal-weight aggregate
    Aggregate {
        /// JSON results file (defaults to the database)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// sharpe, return, max_drawdown or trades
        #[arg(long, default_value = "sharpe")]
        sort: SortCriterion,
        #[arg(long, default_value = "100000")]
        balance: Decimal,
    },
    /// Best strategy per symbol and how often each strategy won
    Best {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Static optimized portfolio over the full horizon
    Optimize {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        strategy_limit: usize,
        #[arg(long, default_value = "100000")]
        balance: Decimal,
    },
    /// Walk-forward run: optimize per division, apply to the next one
    Adaptive {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 5)]
        divisions: usize,
        #[arg(long, default_value_t = 10)]
        strategy_limit: usize,
        #[arg(long, default_value = "100000")]
        balance: Decimal,
        /// Strategy identifiers to consider (comma-separated, default all)
        #[arg(long, value_delimiter = ',')]
        strategies: Vec<String>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<PathBuf>,
        /// Wall-clock cap per division solve, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Launch the JSON API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    config: Arc<OptimizerConfig>,
    adaptive_progress: Arc<AdaptiveProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,stratfolio=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,stratfolio=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("STRATFOLIO_DB_PATH").unwrap_or_else(|_| "data/stratfolio.db".to_string())
}

async fn open_db() -> anyhow::Result<Database> {
    let path = db_path();
    Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

/// Load results from `input` when given, otherwise from the database
async fn load_results(input: Option<PathBuf>) -> anyhow::Result<Vec<BacktestResult>> {
    let source: Box<dyn ResultSource> = match input {
        Some(path) => Box::new(JsonFileSource::new(path)),
        None => Box::new(DatabaseSource::new(open_db().await?.pool_clone())),
    };
    let results = source.load().await?;
    info!(source = %source.describe(), results = results.len(), "Results loaded");
    Ok(results)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = OptimizerConfig {
        risk_free_rate: cli.risk_free_rate,
        ..Default::default()
    };
    config.validate()?;

    match cli.command {
        Commands::Import { input, replace } => cmd_import(input, replace).await?,
        Commands::Aggregate {
            input,
            sort,
            balance,
        } => cmd_aggregate(input, sort, balance, &config).await?,
        Commands::Best { input } => cmd_best(input).await?,
        Commands::Optimize {
            input,
            strategy_limit,
            balance,
        } => cmd_optimize(input, strategy_limit, balance, config).await?,
        Commands::Adaptive {
            input,
            divisions,
            strategy_limit,
            balance,
            strategies,
            export,
            timeout_ms,
        } => {
            let request = AdaptiveRequest {
                n_divisions: divisions,
                strategy_limit,
                starting_balance: balance,
                strategies: (!strategies.is_empty()).then_some(strategies),
            };
            cmd_adaptive(input, request, export, timeout_ms, config).await?
        }
        Commands::Serve { host, port } => cmd_serve(&host, port, config).await?,
    }

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

async fn cmd_import(input: PathBuf, replace: bool) -> anyhow::Result<()> {
    let results = JsonFileSource::new(&input).load().await?;
    let db = open_db().await?;
    let repo = db.results();

    if replace {
        let removed = repo.delete_all().await?;
        info!(removed, "Cleared previous results");
    }

    let mut inserted = 0usize;
    for result in &results {
        if repo.save(&source::to_record(result)?).await? {
            inserted += 1;
        }
    }

    println!(
        "Imported {} of {} results from {} ({} already present)",
        inserted,
        results.len(),
        input.display(),
        results.len() - inserted
    );
    println!("Database: {} ({} results)", db_path(), repo.count().await?);
    Ok(())
}

async fn cmd_aggregate(
    input: Option<PathBuf>,
    sort: SortCriterion,
    balance: Decimal,
    config: &OptimizerConfig,
) -> anyhow::Result<()> {
    let mut results = load_results(input).await?;
    sort_results(&mut results, sort);

    println!("\n=== Results (sorted by {}) ===", sort);
    for r in &results {
        print_result_line(r);
    }

    match aggregate_equal_weight(&results, balance, config.risk_free_rate)? {
        Some(report) => {
            println!();
            println!("Final aggregated equity: ${}", report.final_equity.round());
            println!("Return: {:.2}%", report.return_pct);
            println!("Maximum aggregated drawdown: {:.2}%", report.max_drawdown_pct * 100.0);
            println!("Average Sharpe Ratio: {:.2}", report.average_sharpe);
            println!("Combined Sharpe Ratio: {:.2}", report.combined_sharpe);
            println!("Total trades: {}", report.total_trades);
            println!("Average trade duration: {:.2} days", report.avg_trade_duration_days);
            println!("Strategy was implemented on {} symbols.", report.symbols);
        }
        None => println!("No results to aggregate."),
    }
    Ok(())
}

async fn cmd_best(input: Option<PathBuf>) -> anyhow::Result<()> {
    let results = load_results(input).await?;
    let (winners, tally) = best_per_symbol(&results);

    println!("\n=== Best strategy per symbol ===");
    for r in &winners {
        print_result_line(r);
    }

    println!();
    for (strategy, count) in &tally.counts {
        println!("Strategy {} was selected {} times.", strategy, count);
    }
    match tally.most_selected() {
        Some((strategy, count)) => {
            println!("\nThe most selected strategy is {}, chosen {} times.", strategy, count)
        }
        None => println!("No strategy had a positive Sharpe ratio."),
    }
    Ok(())
}

async fn cmd_optimize(
    input: Option<PathBuf>,
    strategy_limit: usize,
    balance: Decimal,
    config: OptimizerConfig,
) -> anyhow::Result<()> {
    let results = align_results(load_results(input).await?);

    let (results, report) = tokio::task::spawn_blocking(move || {
        let report = optimized_portfolio_report(&results, strategy_limit, balance, &config);
        (results, report)
    })
    .await?;
    let report = report?;

    let Some(report) = report else {
        println!("No results to aggregate.");
        return Ok(());
    };

    println!("\n=== Optimized portfolio ===");
    print_portfolio(&report.portfolio);
    println!("\n=== Held results ===");
    for r in held_results(&results, &report.portfolio) {
        print_result_line(&r);
    }
    println!();
    println!("Final aggregated equity: ${}", report.final_equity.round());
    println!("Return: {:.2}%", report.return_pct);
    println!("Maximum aggregated drawdown: {:.2}%", report.max_drawdown_pct * 100.0);
    println!("Optimized Sharpe Ratio: {:.2}", report.optimized_sharpe);
    if !report.converged {
        println!("(solver stopped before converging)");
    }

    let db = open_db().await?;
    let record = static_run_record(&report, strategy_limit, balance)?;
    db.runs().save(&record).await?;
    info!(run_id = %record.run_id, "Run saved");
    Ok(())
}

async fn cmd_adaptive(
    input: Option<PathBuf>,
    request: AdaptiveRequest,
    export: Option<PathBuf>,
    timeout_ms: Option<u64>,
    config: OptimizerConfig,
) -> anyhow::Result<()> {
    println!("\n=== Stratfolio v{} ===", APP_VERSION);
    let results = align_results(load_results(input).await?);
    println!(
        "Results: {} | Divisions: {} | Strategy limit: {} | Balance: ${}",
        results.len(),
        request.n_divisions,
        request.strategy_limit,
        request.starting_balance
    );

    let config = OptimizerConfig {
        max_duration_ms: timeout_ms,
        ..config
    };
    let job_request = request.clone();
    let run = tokio::task::spawn_blocking(move || run_adaptive(&results, &job_request, &config)).await??;

    for d in &run.outcome.divisions {
        println!(
            "\nDivision {} [{}..{}): score {:.3}{}",
            d.division.index,
            d.division.start,
            d.division.end,
            d.score,
            if d.converged { "" } else { " (not converged)" }
        );
        print_portfolio(&d.portfolio);
    }

    match &run.curve.report {
        Some(report) => {
            println!();
            println!("Final aggregated equity: ${}", report.final_equity.round());
            println!("Return: {:.2}%", report.return_pct);
            match report.max_drawdown_time.and_then(chrono::DateTime::from_timestamp_millis) {
                Some(at) => println!(
                    "Maximum aggregated drawdown: {:.2}% on {}",
                    report.max_drawdown_pct * 100.0,
                    at.date_naive()
                ),
                None => println!("Maximum aggregated drawdown: {:.2}%", report.max_drawdown_pct * 100.0),
            }
            println!("Sharpe Ratio: {:.2}", report.sharpe);
        }
        None => println!("\nNo results to aggregate."),
    }

    let db = open_db().await?;
    let record = adaptive_run_record(&run)?;
    db.runs().save(&record).await?;
    info!(run_id = %record.run_id, "Run saved");

    if let Some(path) = export {
        tokio::fs::write(&path, serde_json::to_string_pretty(&run)?).await?;
        println!("Exported to {}", path.display());
    }
    Ok(())
}

fn print_result_line(r: &BacktestResult) {
    let weight = r.weight.map(|w| format!(" | Weight: {:.4}", w)).unwrap_or_default();
    println!(
        "{:<8} | Return: {:>8.2}% | Max. Drawdown: {:>6.2}% | Sharpe Ratio: {:>5.2} | Strategy: {}{}",
        r.symbol, r.return_pct, -r.max_drawdown_pct, r.sharpe, r.strategy, weight
    );
}

/// Results carrying a portfolio weight, heaviest first
fn held_results(results: &[BacktestResult], portfolio: &OptimalPortfolio) -> Vec<BacktestResult> {
    let mut held: Vec<BacktestResult> = annotate_weights(results, portfolio)
        .into_iter()
        .filter(|r| r.weight.is_some_and(|w| w > 0.0))
        .collect();
    held.sort_by(|a, b| b.weight.unwrap_or(0.0).total_cmp(&a.weight.unwrap_or(0.0)));
    held
}

fn print_portfolio(portfolio: &OptimalPortfolio) {
    if portfolio.is_empty() {
        println!("  (empty portfolio)");
        return;
    }
    for (symbol, entry) in portfolio.entries() {
        println!(
            "  {:<8} {:<28} weight {:.4}  sharpe {:.2}",
            symbol, entry.strategy, entry.weight, entry.sharpe
        );
    }
}

// ============================================================================
// Run records
// ============================================================================

fn new_run_id() -> String {
    Utc::now().timestamp_millis().to_string()
}

fn adaptive_run_record(run: &AdaptiveRun) -> anyhow::Result<PortfolioRunRecord> {
    let report = run.curve.report.as_ref();
    Ok(PortfolioRunRecord {
        id: None,
        run_id: new_run_id(),
        mode: "adaptive".to_string(),
        n_divisions: run.request.n_divisions as i64,
        strategy_limit: run.request.strategy_limit as i64,
        starting_balance: run.request.starting_balance.to_string(),
        final_equity: report.map(|r| r.final_equity.to_string()),
        return_pct: report.map(|r| r.return_pct),
        sharpe: report.map(|r| r.sharpe),
        portfolios: serde_json::to_string(&run.outcome.portfolios())?,
        scores: serde_json::to_string(&run.outcome.scores())?,
        created_at: None,
        all_converged: i64::from(run.outcome.all_converged()),
        strategies: run.request.strategies.as_ref().map(|s| s.join(",")),
    })
}

fn static_run_record(
    report: &PortfolioReport,
    strategy_limit: usize,
    balance: Decimal,
) -> anyhow::Result<PortfolioRunRecord> {
    Ok(PortfolioRunRecord {
        id: None,
        run_id: new_run_id(),
        mode: "static".to_string(),
        n_divisions: 1,
        strategy_limit: strategy_limit as i64,
        starting_balance: balance.to_string(),
        final_equity: Some(report.final_equity.to_string()),
        return_pct: Some(report.return_pct),
        sharpe: Some(report.optimized_sharpe),
        portfolios: serde_json::to_string(&[&report.portfolio])?,
        scores: serde_json::to_string(&[report.optimized_sharpe])?,
        created_at: None,
        all_converged: i64::from(report.converged),
        strategies: None,
    })
}

// ============================================================================
// Serve command — Axum JSON API
// ============================================================================

async fn cmd_serve(host: &str, port: u16, config: OptimizerConfig) -> anyhow::Result<()> {
    info!("Stratfolio v{} starting...", APP_VERSION);

    let db = open_db().await?;
    info!("Database initialized: {}", db_path());

    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config),
        adaptive_progress: Arc::new(AdaptiveProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/results", get(api_results))
        .route("/adaptive", post(api_start_adaptive))
        .route("/adaptive/status", get(api_adaptive_status))
        .route("/runs", get(api_runs))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Stratfolio v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/results             - Imported results (optional ?symbol=)");
    println!("  POST /api/adaptive            - Start a walk-forward run");
    println!("  GET  /api/adaptive/status     - Poll walk-forward progress");
    println!("  GET  /api/runs                - Recent portfolio runs");
    println!("\n  Database: {}", db_path());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "stratfolio",
        "version": APP_VERSION,
    }))
}

#[derive(Deserialize)]
struct ResultsParams {
    symbol: Option<String>,
}

async fn api_results(
    State(state): State<AppState>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let repo = state.db.results();
    let records = match &params.symbol {
        Some(symbol) => repo.get_by_symbol(symbol).await,
        None => repo.get_all().await,
    }
    .map_err(|e| {
        error!("Failed to load results: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "symbol": r.symbol,
                "strategy": r.strategy,
                "sharpe": r.sharpe,
                "return_pct": r.return_pct,
                "max_drawdown_pct": r.max_drawdown_pct,
                "total_trades": r.total_trades,
                "points": r.points,
                "hash": r.result_hash,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "total": rows.len(),
        "results": rows,
    })))
}

#[derive(Deserialize)]
struct AdaptiveBody {
    #[serde(flatten)]
    request: AdaptiveRequest,
    timeout_ms: Option<u64>,
}

async fn api_start_adaptive(
    State(state): State<AppState>,
    Json(body): Json<AdaptiveBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let results = match DatabaseSource::new(state.db.pool_clone()).load().await {
        Ok(r) => align_results(r),
        Err(e) => {
            error!("Failed to load results: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    if results.is_empty() {
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": "No results to aggregate. Import results first.",
        })));
    }

    if !state.adaptive_progress.try_start() {
        let pct = state.adaptive_progress.progress_pct();
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": format!("Adaptive run already in progress ({:.0}% complete)", pct),
        })));
    }

    let request = body.request;
    info!(
        divisions = request.n_divisions,
        strategy_limit = request.strategy_limit,
        balance = %request.starting_balance,
        results = results.len(),
        "Starting adaptive run"
    );

    let progress = state.adaptive_progress.clone();
    let tracker = state.adaptive_progress.clone();
    let db = state.db.clone();
    let config = OptimizerConfig {
        max_duration_ms: body.timeout_ms.or(state.config.max_duration_ms),
        ..(*state.config).clone()
    };
    let total_results = results.len();

    tokio::spawn(async move {
        let job = tokio::task::spawn_blocking(move || {
            run_adaptive_tracked(&results, &request, &config, &progress)
        })
        .await;

        match job {
            Ok(Ok(run)) => match adaptive_run_record(&run) {
                Ok(record) => {
                    if let Err(e) = db.runs().save(&record).await {
                        warn!("Failed to save run: {}", e);
                    }
                }
                Err(e) => warn!("Failed to encode run: {}", e),
            },
            Ok(Err(e)) => error!("Adaptive run failed: {}", e),
            Err(e) => {
                error!("Adaptive task panicked: {}", e);
                *tracker.status.write().unwrap() = AdaptiveStatus::Error;
                *tracker.error_message.write().unwrap() = Some(e.to_string());
            }
        }
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Adaptive run started over {} results", total_results),
    })))
}

async fn api_adaptive_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.adaptive_progress;
    let status = progress.status();
    let total = progress
        .total_divisions
        .load(std::sync::atomic::Ordering::Relaxed);
    let completed = progress
        .completed
        .load(std::sync::atomic::Ordering::Relaxed);
    let pct = progress.progress_pct();
    let result = progress.result.read().unwrap().clone();
    let error = progress.error_message.read().unwrap().clone();

    Json(serde_json::json!({
        "status": status,
        "progress_pct": pct,
        "completed": completed,
        "total": total,
        "result": result,
        "error": error,
    }))
}

#[derive(Deserialize)]
struct RunsParams {
    #[serde(default = "default_runs_limit")]
    limit: u32,
}

fn default_runs_limit() -> u32 {
    20
}

async fn api_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let runs = state.db.runs().get_recent(params.limit).await.map_err(|e| {
        error!("Failed to load runs: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let rows: Vec<serde_json::Value> = runs
        .iter()
        .map(|r| {
            serde_json::json!({
                "run_id": r.run_id,
                "mode": r.mode,
                "n_divisions": r.n_divisions,
                "strategy_limit": r.strategy_limit,
                "starting_balance": r.starting_balance,
                "final_equity": r.final_equity,
                "return_pct": r.return_pct,
                "sharpe": r.sharpe,
                "all_converged": r.all_converged != 0,
                "portfolios": serde_json::from_str::<serde_json::Value>(&r.portfolios).unwrap_or_default(),
                "scores": serde_json::from_str::<serde_json::Value>(&r.scores).unwrap_or_default(),
                "created_at": r.created_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "runs": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::EquityPoint;
    use rust_decimal_macros::dec;

    fn run_fixture() -> AdaptiveRun {
        let curve: Vec<EquityPoint> = (0..60)
            .map(|i| EquityPoint {
                time: i * 86_400_000,
                equity: 100_000.0 * (1.0 + 0.001 * i as f64) + if i % 2 == 0 { 150.0 } else { -150.0 },
                drawdown_pct: 0.0,
            })
            .collect();
        let results = vec![BacktestResult::new("SPY", "solo_rsi", 0.5, curve)];
        let request = AdaptiveRequest::new(3, 2, dec!(100000));
        run_adaptive(&results, &request, &OptimizerConfig::default()).unwrap()
    }

    #[test]
    fn test_adaptive_run_record() {
        let run = run_fixture();
        let record = adaptive_run_record(&run).unwrap();

        assert_eq!(record.mode, "adaptive");
        assert_eq!(record.n_divisions, 3);
        assert_eq!(record.starting_balance, "100000");
        let scores: Vec<f64> = serde_json::from_str(&record.scores).unwrap();
        assert_eq!(scores.len(), 3);
        let portfolios: Vec<OptimalPortfolio> = serde_json::from_str(&record.portfolios).unwrap();
        assert_eq!(portfolios.len(), 3);
    }

    #[tokio::test]
    async fn test_run_record_persists() {
        let db = Database::in_memory().await.unwrap();
        let record = adaptive_run_record(&run_fixture()).unwrap();
        db.runs().save(&record).await.unwrap();

        let stored = db.runs().get_by_run_id(&record.run_id).await.unwrap().unwrap();
        assert_eq!(stored.starting_balance().unwrap(), dec!(100000));
    }

    #[test]
    fn test_cli_parses_adaptive_flags() {
        let cli = Cli::try_parse_from([
            "stratfolio",
            "adaptive",
            "--divisions",
            "4",
            "--strategies",
            "solo_rsi,daily_range",
            "--balance",
            "25000.50",
        ])
        .unwrap();
        match cli.command {
            Commands::Adaptive {
                divisions,
                strategies,
                balance,
                ..
            } => {
                assert_eq!(divisions, 4);
                assert_eq!(strategies, vec!["solo_rsi", "daily_range"]);
                assert_eq!(balance, dec!(25000.50));
            }
            _ => panic!("expected adaptive command"),
        }
    }

    #[test]
    fn test_held_results_use_portfolio_weights() {
        let run = run_fixture();
        let results = vec![
            BacktestResult::new("SPY", "solo_rsi", 0.5, Vec::new()),
            BacktestResult::new("QQQ", "daily_range", 0.2, Vec::new()),
        ];
        let portfolio = &run.outcome.portfolios()[0];

        let held = held_results(&results, portfolio);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].symbol, "SPY");
        assert_eq!(held[0].weight, Some(1.0));
        assert!(results.iter().all(|r| r.weight.is_none()));
    }

    #[test]
    fn test_cli_parses_risk_free_rate() {
        let cli = Cli::try_parse_from(["stratfolio", "aggregate", "--risk-free-rate", "0.05"]).unwrap();
        assert_eq!(cli.risk_free_rate, 0.05);

        let cli = Cli::try_parse_from(["stratfolio", "best"]).unwrap();
        assert_eq!(cli.risk_free_rate, engine::sharpe::DEFAULT_RISK_FREE_RATE);
    }

    #[tokio::test]
    async fn test_second_adaptive_start_is_rejected() {
        let db = Database::in_memory().await.unwrap();
        let curve: Vec<EquityPoint> = (0..30)
            .map(|i| EquityPoint {
                time: i * 86_400_000,
                equity: 100_000.0 + if i % 2 == 0 { 100.0 } else { -100.0 },
                drawdown_pct: 0.0,
            })
            .collect();
        let stored = source::to_record(&BacktestResult::new("SPY", "solo_rsi", 0.1, curve)).unwrap();
        db.results().save(&stored).await.unwrap();

        let state = AppState {
            db: Arc::new(db),
            config: Arc::new(OptimizerConfig::default()),
            adaptive_progress: Arc::new(AdaptiveProgress::new()),
        };
        assert!(state.adaptive_progress.try_start());

        let body = AdaptiveBody {
            request: AdaptiveRequest::new(3, 1, dec!(100000)),
            timeout_ms: None,
        };
        let Json(reply) = api_start_adaptive(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(reply["success"], false);
        assert!(state.adaptive_progress.is_running());
    }
}
