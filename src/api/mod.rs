use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BatchConfig, BatchSummary, ConfigError, DEFAULT_SEED, DEFAULT_TRIALS, Scenario, TaxTables,
    TrialOutcome, UniformLifetimeTable, default_workers, run_batch, summarize_batch,
};

const MAX_API_TRIALS: u32 = 100_000;

#[derive(Parser, Debug)]
#[command(
    name = "lifecast",
    about = "Monte Carlo household finance projections (income, RMDs, Roth conversions, taxes)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Run a batch for one scenario file and print the summary as JSON")]
    Run(RunArgs),
    #[command(about = "Serve the simulation API over HTTP")]
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Scenario JSON file")]
    scenario: PathBuf,
    #[arg(long, default_value_t = DEFAULT_TRIALS)]
    trials: u32,
    #[arg(long, help = "Concurrent trials; defaults to the number of CPUs")]
    workers: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
    #[arg(long, help = "Tax tables JSON replacing the embedded 2024 set")]
    tax_data: Option<PathBuf>,
    #[arg(long, help = "Include every trial's outcome and trajectory")]
    trajectories: bool,
    #[arg(long, help = "Write the JSON result to this file instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Tax tables JSON replacing the embedded 2024 set")]
    tax_data: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    scenario: Scenario,
    #[serde(default)]
    trials: Option<u32>,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    include_trajectories: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    scenario: String,
    trials: u32,
    seed: u64,
    financial_goal: f64,
    summary: BatchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcomes: Option<Vec<TrialOutcome>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Clone)]
struct AppState {
    tables: Arc<TaxTables>,
}

fn build_batch_config(trials: u32, workers: Option<usize>, seed: u64) -> Result<BatchConfig, String> {
    if trials == 0 {
        return Err("--trials must be > 0".to_string());
    }
    if workers == Some(0) {
        return Err("--workers must be > 0".to_string());
    }
    Ok(BatchConfig {
        trials,
        workers: workers.unwrap_or_else(default_workers),
        seed,
    })
}

fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("cannot read scenario {}: {e}", path.display()))?;
    Scenario::from_json(&json).map_err(|e| format!("invalid scenario {}: {e}", path.display()))
}

pub fn load_tax_tables(path: Option<&Path>) -> Result<TaxTables, String> {
    let Some(path) = path else {
        return Ok(TaxTables::embedded());
    };
    let json = fs::read_to_string(path)
        .map_err(|e| format!("cannot read tax data {}: {e}", path.display()))?;
    TaxTables::from_json(&json).map_err(|e| format!("invalid tax data {}: {e}", path.display()))
}

async fn simulate(
    scenario: Scenario,
    tables: &TaxTables,
    config: BatchConfig,
    include_trajectories: bool,
) -> Result<SimulateResponse, ConfigError> {
    let name = scenario.name.clone();
    let financial_goal = scenario.financial_goal;
    let batch = run_batch(
        Arc::new(scenario),
        tables,
        Arc::new(UniformLifetimeTable::default()),
        config,
    )
    .await?;
    let summary = summarize_batch(&batch, financial_goal);

    Ok(SimulateResponse {
        scenario: name,
        trials: config.trials,
        seed: config.seed,
        financial_goal,
        summary,
        outcomes: include_trajectories.then_some(batch.outcomes),
    })
}

pub async fn run_scenario_file(args: RunArgs) -> Result<(), String> {
    let scenario = load_scenario(&args.scenario)?;
    let tables = load_tax_tables(args.tax_data.as_deref())?;
    let config = build_batch_config(args.trials, args.workers, args.seed)?;

    let response = simulate(scenario, &tables, config, args.trajectories)
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("cannot serialize result: {e}"))?;

    match args.output {
        Some(path) => {
            fs::write(&path, json).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
            info!(path = %path.display(), "result written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn router(tables: Arc<TaxTables>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler)
        .with_state(AppState { tables })
}

pub async fn run_http_server(args: ServeArgs) -> Result<(), String> {
    let tables = Arc::new(load_tax_tables(args.tax_data.as_deref())?);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("cannot bind {addr}: {e}"))?;
    info!(%addr, "lifecast HTTP API listening");

    axum::serve(listener, router(tables))
        .await
        .map_err(|e| format!("server error: {e}"))
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    let config = match api_config_from_payload(&payload) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match simulate(
        payload.scenario,
        &state.tables,
        config,
        payload.include_trajectories,
    )
    .await
    {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    }
}

fn api_config_from_payload(payload: &SimulatePayload) -> Result<BatchConfig, String> {
    let trials = payload.trials.unwrap_or(DEFAULT_TRIALS);
    if trials == 0 {
        return Err("trials must be > 0".to_string());
    }
    if trials > MAX_API_TRIALS {
        return Err(format!("trials must be <= {MAX_API_TRIALS}"));
    }
    if payload.workers == Some(0) {
        return Err("workers must be > 0".to_string());
    }
    Ok(BatchConfig {
        trials,
        workers: payload.workers.unwrap_or_else(default_workers),
        seed: payload.seed.unwrap_or(DEFAULT_SEED),
    })
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
