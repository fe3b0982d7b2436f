use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Catalog, LOOKBACK_MINUTES, MAX_HISTORY_HOURS, MAX_LOOKBACK_MINUTES};
use crate::db::writer::recent_movements;
use crate::error::AppError;
use crate::state::EventBoard;
use crate::store::{SnapshotStore, SqliteSnapshotStore};
use crate::tracker::LineTracker;
use crate::types::{format_odds, LineSnapshot, MarketSpec, Movement};

const DEFAULT_HISTORY_HOURS: i64 = 24;
const DEFAULT_RECENT_LIMIT: i64 = 50;
const MAX_RECENT_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SqliteSnapshotStore>,
    pub tracker: Arc<LineTracker<SqliteSnapshotStore>>,
    pub catalog: Arc<Catalog>,
    pub board: Arc<EventBoard>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/events", get(get_events))
        .route("/events/:event_id/movements", get(get_event_movements))
        .route("/events/:event_id/markets/:market_id/lines", get(get_current_lines))
        .route("/events/:event_id/markets/:market_id/best-odds", get(get_best_odds))
        .route("/events/:event_id/markets/:market_id/history", get(get_line_history))
        .route("/movements/recent", get(get_recent_movements))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MovementsQuery {
    pub lookback_minutes: Option<i64>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub selection: Option<String>,
    pub hours: Option<i64>,
}

#[derive(Deserialize)]
pub struct RecentMovementsQuery {
    pub limit: Option<i64>,
    pub event_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_cycle_at_ms: Option<i64>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub market_fetch_errors: u64,
    pub snapshots_written: u64,
    pub movements_flagged: u64,
    pub write_queue_pending: u64,
    pub live_events: usize,
    pub events_refreshed_at_ms: Option<i64>,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: String,
    pub matchup: String,
    pub home_team: String,
    pub away_team: String,
    pub scheduled: Option<DateTime<Utc>>,
    pub status: String,
    /// Present in the most recent provider listing.
    pub live: bool,
}

#[derive(Serialize)]
pub struct MovementResponse {
    pub event_id: String,
    pub market_id: u32,
    pub market_name: Option<String>,
    pub bookie_id: u32,
    pub bookie_name: String,
    pub selection: String,
    pub player_name: Option<String>,
    pub previous_odds: i32,
    pub current_odds: i32,
    pub previous_odds_display: String,
    pub current_odds_display: String,
    pub odds_delta: i32,
    pub previous_line: Option<f64>,
    pub current_line: Option<f64>,
    pub line_delta: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CurrentLinesResponse {
    pub event_id: String,
    pub market_id: u32,
    pub market_name: String,
    /// Timestamp of the generation shown; None when nothing is stored yet.
    pub observed_at: Option<DateTime<Utc>>,
    pub lines: Vec<CurrentLine>,
}

#[derive(Serialize)]
pub struct CurrentLine {
    pub bookie_id: u32,
    pub bookie_name: String,
    pub selection: String,
    pub player_name: Option<String>,
    pub line_value: Option<f64>,
    pub odds: i32,
    pub odds_display: String,
}

#[derive(Serialize)]
pub struct BestOddsResponse {
    pub event_id: String,
    pub market_id: u32,
    pub market_name: String,
    pub selections: BTreeMap<String, BestOddsLine>,
}

#[derive(Serialize)]
pub struct BestOddsLine {
    pub bookie_id: u32,
    pub bookie_name: String,
    pub odds: i32,
    pub odds_display: String,
    pub line_value: Option<f64>,
}

#[derive(Serialize)]
pub struct HistoryPoint {
    pub bookie_id: u32,
    pub bookie_name: String,
    pub selection: String,
    pub player_name: Option<String>,
    pub line_value: Option<f64>,
    pub odds: i32,
    pub odds_display: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl MovementResponse {
    fn from_movement(m: Movement, catalog: &Catalog) -> Self {
        Self {
            market_name: catalog.market(m.market_id).map(|s| s.name.clone()),
            bookie_name: catalog.bookie_label(m.bookie_id),
            previous_odds_display: format_odds(m.previous_odds),
            current_odds_display: format_odds(m.current_odds),
            event_id: m.event_id,
            market_id: m.market_id,
            bookie_id: m.bookie_id,
            selection: m.selection,
            player_name: m.player_name,
            previous_odds: m.previous_odds,
            current_odds: m.current_odds,
            odds_delta: m.odds_delta,
            previous_line: m.previous_line,
            current_line: m.current_line,
            line_delta: m.line_delta,
            timestamp: m.timestamp,
        }
    }
}

impl HistoryPoint {
    fn from_snapshot(s: LineSnapshot, catalog: &Catalog) -> Self {
        Self {
            bookie_name: catalog.bookie_label(s.bookie_id),
            odds_display: format_odds(s.odds),
            bookie_id: s.bookie_id,
            selection: s.selection,
            player_name: s.player_name,
            line_value: s.line_value,
            odds: s.odds,
            timestamp: s.timestamp,
        }
    }
}

/// Query windows are bounded so the cutoff stays a valid timestamp.
fn window(param: &str, value: i64, max: i64) -> Result<i64, AppError> {
    if (1..=max).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::BadRequest(format!("{param} must be between 1 and {max}, got {value}")))
    }
}

fn known_market(catalog: &Catalog, market_id: u32) -> Result<&MarketSpec, AppError> {
    catalog
        .market(market_id)
        .ok_or_else(|| AppError::NotFound(format!("market {market_id}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let last = state.health.last_cycle_at_ms();
    Json(HealthResponse {
        status: "ok",
        last_cycle_at_ms: (last > 0).then_some(last),
        cycles_completed: state.health.cycles_completed(),
        cycles_failed: state.health.cycles_failed(),
        market_fetch_errors: state.health.market_fetch_errors(),
        snapshots_written: state.health.snapshots_written(),
        movements_flagged: state.health.movements_flagged(),
        write_queue_pending: state.health.write_queue_pending(),
        live_events: state.board.len(),
        events_refreshed_at_ms: Some(state.board.refreshed_at_ms()).filter(|&t| t > 0),
    })
}

async fn get_events(State(state): State<ApiState>) -> Result<Json<Vec<EventResponse>>, AppError> {
    let events = state.store.events().await?;
    let rows = events
        .into_iter()
        .map(|e| EventResponse {
            live: state.board.contains(&e.event_id),
            matchup: e.matchup(),
            event_id: e.event_id,
            home_team: e.home_team,
            away_team: e.away_team,
            scheduled: e.scheduled,
            status: e.status,
        })
        .collect();
    Ok(Json(rows))
}

/// Runs detection on demand. Nothing is persisted.
async fn get_event_movements(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
    Query(params): Query<MovementsQuery>,
) -> Result<Json<Vec<MovementResponse>>, AppError> {
    let minutes = window(
        "lookback_minutes",
        params.lookback_minutes.unwrap_or(LOOKBACK_MINUTES),
        MAX_LOOKBACK_MINUTES,
    )?;
    let movements = state.tracker.detect(&event_id, Duration::minutes(minutes)).await?;
    Ok(Json(
        movements
            .into_iter()
            .map(|m| MovementResponse::from_movement(m, &state.catalog))
            .collect(),
    ))
}

async fn get_current_lines(
    State(state): State<ApiState>,
    Path((event_id, market_id)): Path<(String, u32)>,
) -> Result<Json<CurrentLinesResponse>, AppError> {
    let market = known_market(&state.catalog, market_id)?;
    let mut generation = state.tracker.current_lines(&event_id, market_id).await?;
    generation.sort_by(|a, b| (a.bookie_id, &a.selection).cmp(&(b.bookie_id, &b.selection)));

    let observed_at = generation.first().map(|s| s.timestamp);
    let lines = generation
        .into_iter()
        .map(|s| CurrentLine {
            bookie_name: state.catalog.bookie_label(s.bookie_id),
            odds_display: format_odds(s.odds),
            bookie_id: s.bookie_id,
            selection: s.selection,
            player_name: s.player_name,
            line_value: s.line_value,
            odds: s.odds,
        })
        .collect();

    Ok(Json(CurrentLinesResponse {
        event_id,
        market_id,
        market_name: market.name.clone(),
        observed_at,
        lines,
    }))
}

async fn get_best_odds(
    State(state): State<ApiState>,
    Path((event_id, market_id)): Path<(String, u32)>,
) -> Result<Json<BestOddsResponse>, AppError> {
    let market = known_market(&state.catalog, market_id)?;
    let best = state.tracker.best_odds(&event_id, market_id).await?;

    let selections = best
        .into_iter()
        .map(|(selection, entry)| {
            let line = BestOddsLine {
                bookie_id: entry.bookie_id,
                bookie_name: state.catalog.bookie_label(entry.bookie_id),
                odds: entry.odds,
                odds_display: format_odds(entry.odds),
                line_value: entry.line_value,
            };
            (selection, line)
        })
        .collect();

    Ok(Json(BestOddsResponse {
        event_id,
        market_id,
        market_name: market.name.clone(),
        selections,
    }))
}

async fn get_line_history(
    State(state): State<ApiState>,
    Path((event_id, market_id)): Path<(String, u32)>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryPoint>>, AppError> {
    known_market(&state.catalog, market_id)?;
    let hours = window("hours", params.hours.unwrap_or(DEFAULT_HISTORY_HOURS), MAX_HISTORY_HOURS)?;
    let since = Utc::now() - Duration::hours(hours);

    let rows = state
        .store
        .line_history(&event_id, market_id, params.selection.as_deref(), since)
        .await?;

    Ok(Json(
        rows.into_iter()
            .map(|s| HistoryPoint::from_snapshot(s, &state.catalog))
            .collect(),
    ))
}

async fn get_recent_movements(
    State(state): State<ApiState>,
    Query(params): Query<RecentMovementsQuery>,
) -> Result<Json<Vec<MovementResponse>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT);
    let rows = recent_movements(state.store.pool(), params.event_id.as_deref(), limit).await?;
    Ok(Json(
        rows.into_iter()
            .map(|m| MovementResponse::from_movement(m, &state.catalog))
            .collect(),
    ))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}
