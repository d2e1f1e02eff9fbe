use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use divplan_core::analytics::growth::{growth_series, Granularity};
use divplan_core::domain::contract::{normalize_tickers, split_tickers, PlanRequest};
use divplan_core::domain::plan::{GrowthPoint, PlanInputs, PlanReport, Recommendation};
use divplan_core::domain::snapshot::{Snapshot, Valuation};
use divplan_core::domain::Ticker;
use divplan_core::error::EngineError;
use divplan_core::planner::{Planner, PlannerOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = divplan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let planner = match divplan_core::market::provider_from_settings(&settings) {
        Ok(provider) => {
            let planner = Planner::new(provider, PlannerOptions::from_env());
            tracing::info!(provider = planner.provider_name(), "market data provider ready");
            Some(Arc::new(planner))
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "market data provider unavailable; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { planner });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/snapshots", get(get_snapshots))
        .route("/valuations", get(get_valuations))
        .route("/recommendations", get(get_recommendations))
        .route("/growth", get(get_growth))
        .route("/plans", post(create_plan))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    planner: Option<Arc<Planner>>,
}

impl AppState {
    fn planner(&self) -> Result<&Planner, ApiError> {
        self.planner.as_deref().ok_or_else(|| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "market data provider is not configured",
            )
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(err: anyhow::Error) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("{err:#}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(e) if e.is_actionable() => Self::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            Some(e) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            None => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TickersQuery {
    tickers: String,
    as_of: Option<String>,
}

impl TickersQuery {
    fn parse(&self) -> Result<(Vec<Ticker>, NaiveDate), ApiError> {
        let tickers = normalize_tickers(&split_tickers(&self.tickers)).map_err(ApiError::bad_request)?;
        Ok((tickers, resolve_as_of(self.as_of.as_deref())?))
    }
}

fn resolve_as_of(arg: Option<&str>) -> Result<NaiveDate, ApiError> {
    divplan_core::time::resolve_as_of_date(arg, Utc::now()).map_err(ApiError::bad_request)
}

async fn get_snapshots(
    State(state): State<AppState>,
    Query(q): Query<TickersQuery>,
) -> Result<Json<BTreeMap<Ticker, Snapshot>>, ApiError> {
    let planner = state.planner()?;
    let (tickers, as_of) = q.parse()?;
    Ok(Json(planner.snapshots_as_of(&tickers, as_of).await))
}

async fn get_valuations(
    State(state): State<AppState>,
    Query(q): Query<TickersQuery>,
) -> Result<Json<BTreeMap<Ticker, Valuation>>, ApiError> {
    let planner = state.planner()?;
    let (tickers, _) = q.parse()?;
    Ok(Json(planner.valuations(&tickers).await))
}

#[derive(Debug, Deserialize)]
struct RecommendQuery {
    pool: Option<String>,
    top: Option<usize>,
    as_of: Option<String>,
}

async fn get_recommendations(
    State(state): State<AppState>,
    Query(q): Query<RecommendQuery>,
) -> Result<Json<Recommendation>, ApiError> {
    let planner = state.planner()?;
    let pool = q
        .pool
        .as_deref()
        .map(|p| normalize_tickers(&split_tickers(p)))
        .transpose()
        .map_err(ApiError::bad_request)?;
    let as_of = resolve_as_of(q.as_of.as_deref())?;

    planner
        .recommend_as_of(pool.as_deref(), q.top.filter(|n| *n > 0), as_of)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}")))
}

#[derive(Debug, Deserialize)]
struct GrowthQuery {
    #[serde(default)]
    current: f64,
    #[serde(default)]
    monthly: f64,
    years: u32,
    rate: f64,
    #[serde(default)]
    granularity: Granularity,
}

async fn get_growth(Query(q): Query<GrowthQuery>) -> Result<Json<Vec<GrowthPoint>>, ApiError> {
    let finite = [q.current, q.monthly, q.rate].iter().all(|v| v.is_finite());
    if !finite || q.years == 0 || q.years > 100 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "current, monthly and rate must be finite and years in 1..=100",
        ));
    }

    let points = growth_series(q.granularity, q.current, q.monthly, q.years, q.rate).collect();
    Ok(Json(points))
}

/// Plan request body; `as_of` pins the reference date like the query endpoints do.
#[derive(Debug, Deserialize)]
struct PlanBody {
    #[serde(flatten)]
    request: PlanRequest,
    as_of: Option<String>,
}

impl PlanBody {
    fn parse(self) -> Result<(Vec<Ticker>, PlanInputs, NaiveDate), ApiError> {
        let as_of = resolve_as_of(self.as_of.as_deref())?;
        let (tickers, inputs) = self
            .request
            .validate_and_into_inputs()
            .map_err(ApiError::bad_request)?;
        Ok((tickers, inputs, as_of))
    }
}

async fn create_plan(
    State(state): State<AppState>,
    Json(body): Json<PlanBody>,
) -> Result<Json<PlanReport>, ApiError> {
    let planner = state.planner()?;
    let (tickers, inputs, as_of) = body.parse()?;
    let report = planner.plan_as_of(&tickers, &inputs, as_of).await?;
    Ok(Json(report))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &divplan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
