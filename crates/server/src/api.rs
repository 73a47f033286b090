//! HTTP API handlers mounted under `/api`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use engine::{AlertType, Comparison, Scheduler, TriggerOutcome};
use persistence::repository::{
    AlertRepository, QualityRepository, RunRepository, SnapshotRepository, WatchlistRepository,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::APP_VERSION;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<persistence::Database>,
    pub scheduler: Arc<Scheduler>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/status", get(api_status))
        .route("/pipeline/run", post(api_run_pipeline))
        .route("/alerts/check", post(api_check_alerts))
        .route("/alerts/events", get(api_alert_events))
        .route("/runs", get(api_runs))
        .route("/runs/:run_id", get(api_run_detail))
        .route("/watchlist", get(api_watchlist).post(api_add_coin))
        .route(
            "/watchlist/:coin_id",
            get(api_get_coin).patch(api_update_coin).delete(api_remove_coin),
        )
        .route("/rules", get(api_rules).post(api_create_rule))
        .route("/rules/:alert_id/enabled", post(api_set_rule_enabled))
        .route("/snapshots/:coin_id", get(api_coin_snapshots))
        .with_state(state)
}

fn query_i64(params: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    params
        .get(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn db_error(context: &str, e: impl std::fmt::Display) -> Json<serde_json::Value> {
    warn!(error = %e, "{}", context);
    Json(serde_json::json!({
        "success": false,
        "error": format!("{}: {}", context, e),
    }))
}

// ============================================================================
// Health & scheduler
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "coin-pulse",
        "version": APP_VERSION,
    }))
}

/// GET /api/status: scheduler state and last run
async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "scheduler": state.scheduler.state().status(),
    }))
}

/// POST /api/pipeline/run: start a full run in the background
async fn api_run_pipeline(State(state): State<AppState>) -> Json<serde_json::Value> {
    let scheduler_state = state.scheduler.state();
    let Some(guard) = scheduler_state.try_begin() else {
        return Json(serde_json::json!({
            "success": false,
            "message": "Pipeline already running",
            "active_run_id": scheduler_state.current_run_id(),
        }));
    };

    info!("Manual pipeline run requested");
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let TriggerOutcome::StartFailed { error } = scheduler.run_with_guard(guard).await {
            warn!(error = %error, "Manual run did not start");
        }
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Pipeline run started",
    }))
}

/// POST /api/alerts/check: alert-only pass over the latest snapshots
async fn api_check_alerts(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.scheduler.check_alerts().await {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "result": summary,
        })),
        Err(e) => db_error("Alert check failed", e),
    }
}

// ============================================================================
// Runs
// ============================================================================

/// GET /api/runs?limit=N
async fn api_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit = query_i64(&params, "limit", 20);
    match RunRepository::new(state.db.pool()).recent(limit).await {
        Ok(runs) => Json(serde_json::json!({
            "success": true,
            "data": runs,
            "total": runs.len(),
        })),
        Err(e) => db_error("Failed to list runs", e),
    }
}

/// GET /api/runs/:run_id: run row plus its snapshots, quality and events
async fn api_run_detail(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let pool = state.db.pool();
    let run = match RunRepository::new(pool).get(&run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => return Ok(db_error("Failed to load run", e)),
    };

    let snapshots = SnapshotRepository::new(pool).for_run(&run_id).await;
    let quality = QualityRepository::new(pool).for_run(&run_id).await;
    let events = AlertRepository::new(pool).events_for_run(&run_id).await;

    match (snapshots, quality, events) {
        (Ok(snapshots), Ok(quality), Ok(events)) => Ok(Json(serde_json::json!({
            "success": true,
            "run": run,
            "snapshots": snapshots,
            "quality": quality,
            "events": events,
        }))),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            Ok(db_error("Failed to load run detail", e))
        }
    }
}

// ============================================================================
// Watchlist
// ============================================================================

#[derive(Deserialize)]
struct AddCoinRequest {
    coin_id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    priority: i64,
    notes: Option<String>,
    #[serde(default = "default_true")]
    default_rules: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct UpdateCoinRequest {
    priority: Option<i64>,
    notes: Option<String>,
}

/// GET /api/watchlist: ordered by collection priority
async fn api_watchlist(State(state): State<AppState>) -> Json<serde_json::Value> {
    match WatchlistRepository::new(state.db.pool()).list_by_priority().await {
        Ok(entries) => Json(serde_json::json!({
            "success": true,
            "data": entries,
            "total": entries.len(),
        })),
        Err(e) => db_error("Failed to list watchlist", e),
    }
}

/// POST /api/watchlist: add a coin, optionally with starter rules
async fn api_add_coin(
    State(state): State<AppState>,
    Json(request): Json<AddCoinRequest>,
) -> Json<serde_json::Value> {
    let pool = state.db.pool();
    let added = match WatchlistRepository::new(pool)
        .add(
            &request.coin_id,
            &request.symbol,
            &request.name,
            request.priority,
            request.notes.as_deref(),
        )
        .await
    {
        Ok(added) => added,
        Err(e) => return db_error("Failed to add coin", e),
    };

    if !added {
        return Json(serde_json::json!({
            "success": false,
            "message": format!("{} is already watched", request.coin_id),
        }));
    }

    let mut rules_created = Vec::new();
    if request.default_rules {
        match crate::create_default_rules(pool, &request.coin_id).await {
            Ok(ids) => rules_created = ids,
            Err(e) => return db_error("Coin added but default rules failed", e),
        }
    }

    info!(coin_id = %request.coin_id, rules = rules_created.len(), "Coin added to watchlist");
    Json(serde_json::json!({
        "success": true,
        "coin_id": request.coin_id,
        "rules_created": rules_created,
    }))
}

/// GET /api/watchlist/:coin_id
async fn api_get_coin(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match WatchlistRepository::new(state.db.pool()).get(&coin_id).await {
        Ok(Some(entry)) => Ok(Json(serde_json::json!({ "success": true, "data": entry }))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Ok(db_error("Failed to load coin", e)),
    }
}

/// PATCH /api/watchlist/:coin_id: update priority and/or notes
async fn api_update_coin(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
    Json(request): Json<UpdateCoinRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let repo = WatchlistRepository::new(state.db.pool());
    let mut found = true;

    if let Some(priority) = request.priority {
        match repo.update_priority(&coin_id, priority).await {
            Ok(updated) => found &= updated,
            Err(e) => return Ok(db_error("Failed to update priority", e)),
        }
    }
    if let Some(notes) = request.notes.as_deref() {
        match repo.update_notes(&coin_id, Some(notes)).await {
            Ok(updated) => found &= updated,
            Err(e) => return Ok(db_error("Failed to update notes", e)),
        }
    }

    if !found {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({ "success": true, "coin_id": coin_id })))
}

/// DELETE /api/watchlist/:coin_id: stop collecting; history is kept
async fn api_remove_coin(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match WatchlistRepository::new(state.db.pool()).remove(&coin_id).await {
        Ok(true) => Ok(Json(serde_json::json!({ "success": true, "coin_id": coin_id }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Ok(db_error("Failed to remove coin", e)),
    }
}

// ============================================================================
// Rules & events
// ============================================================================

#[derive(Deserialize)]
struct CreateRuleRequest {
    coin_id: String,
    alert_type: AlertType,
    threshold_value: f64,
    comparison: Comparison,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

/// GET /api/rules?coin_id=bitcoin
async fn api_rules(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let coin_id = params.get("coin_id").map(|s| s.as_str());
    match AlertRepository::new(state.db.pool()).list_rules(coin_id).await {
        Ok(rules) => Json(serde_json::json!({
            "success": true,
            "data": rules,
            "total": rules.len(),
        })),
        Err(e) => db_error("Failed to list rules", e),
    }
}

/// POST /api/rules
async fn api_create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !request.threshold_value.is_finite() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    match AlertRepository::new(state.db.pool())
        .create_rule(
            &request.coin_id,
            request.alert_type.as_str(),
            request.threshold_value,
            request.comparison.as_str(),
            request.enabled,
        )
        .await
    {
        Ok(alert_id) => {
            info!(alert_id, coin_id = %request.coin_id, alert_type = %request.alert_type, "Alert rule created");
            Ok(Json(serde_json::json!({ "success": true, "alert_id": alert_id })))
        }
        Err(e) => Ok(db_error("Failed to create rule", e)),
    }
}

/// POST /api/rules/:alert_id/enabled
async fn api_set_rule_enabled(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match AlertRepository::new(state.db.pool())
        .set_enabled(alert_id, request.enabled)
        .await
    {
        Ok(true) => Ok(Json(serde_json::json!({
            "success": true,
            "alert_id": alert_id,
            "enabled": request.enabled,
        }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Ok(db_error("Failed to update rule", e)),
    }
}

/// GET /api/alerts/events?since=ID&limit=N: `since` polls forward, otherwise newest first
async fn api_alert_events(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit = query_i64(&params, "limit", 50);
    let repo = AlertRepository::new(state.db.pool());
    let events = match params.get("since").and_then(|s| s.parse::<i64>().ok()) {
        Some(since) => repo.events_since(since, limit).await,
        None => repo.recent_events(limit).await,
    };

    match events {
        Ok(events) => Json(serde_json::json!({
            "success": true,
            "data": events,
            "total": events.len(),
        })),
        Err(e) => db_error("Failed to list alert events", e),
    }
}

/// GET /api/snapshots/:coin_id?limit=N
async fn api_coin_snapshots(
    State(state): State<AppState>,
    Path(coin_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit = query_i64(&params, "limit", 48);
    match SnapshotRepository::new(state.db.pool())
        .recent_for_coin(&coin_id, limit)
        .await
    {
        Ok(snapshots) => Json(serde_json::json!({
            "success": true,
            "coin_id": coin_id,
            "data": snapshots,
            "total": snapshots.len(),
        })),
        Err(e) => db_error("Failed to load snapshots", e),
    }
}
