use crate::planning::estimate::estimate;
use crate::planning::plan::{generate_plan, PlanOutput};
use crate::planning::zone::{zone_center, zone_outline};
use crate::run_artifacts::{
    Detection, GeoPoint, TreatmentMethod, TreatmentPlan, TreatmentStats, TreatmentZone,
};
use crate::run_context::{list_runs, load_run_plan, RunMetadata};
use crate::survey::coverage::{build_coverage_path, estimate_flight, CoverageCell, FlightEstimate};
use crate::survey::geometry::polygon_area_m2;
use crate::survey::orchestrator::{
    cancel_survey, get_survey_manager, list_survey_managers, start_survey, PlanUpdateError,
    SurveyOutcome, SurveyRequest,
};
use crate::survey::scenario::mock_detections;
use crate::survey::scheduler::SurveyEvent;
use crate::survey::types::EnvironmentalConditions;
use crate::web::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

fn has_polygon(polygon: &[GeoPoint]) -> bool {
    polygon.len() >= 3 && polygon.iter().all(GeoPoint::is_valid)
}

#[derive(Deserialize)]
pub struct CoverageRequest {
    pub polygon: Vec<GeoPoint>,
    #[serde(default)]
    pub conditions: EnvironmentalConditions,
    pub cell_size_degrees: Option<f64>,
}

#[derive(Serialize)]
pub struct CoverageResponse {
    pub path: Vec<CoverageCell>,
    pub area_m2: f64,
    pub estimate: Option<FlightEstimate>,
}

pub async fn coverage_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CoverageRequest>,
) -> Result<Json<CoverageResponse>, StatusCode> {
    if !has_polygon(&payload.polygon) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let config = &state.env.config;
    let cell_size = payload.cell_size_degrees.unwrap_or(config.cell_size_degrees);

    Ok(Json(CoverageResponse {
        path: build_coverage_path(&payload.polygon, cell_size),
        area_m2: polygon_area_m2(&payload.polygon),
        estimate: estimate_flight(&payload.polygon, config.drone_speed_mps, &payload.conditions),
    }))
}

pub async fn start_survey_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SurveyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    if !has_polygon(&payload.polygon) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    match start_survey(state.env.clone(), payload) {
        Ok(manager) => Ok((StatusCode::ACCEPTED, Json(manager.progress.to_progress_json()))),
        Err(e) => {
            tracing::error!("Failed to start survey: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn list_surveys_handler() -> Json<Vec<serde_json::Value>> {
    Json(
        list_survey_managers()
            .iter()
            .map(|m| m.progress.to_progress_json())
            .collect(),
    )
}

#[derive(Serialize)]
pub struct SurveyStatus {
    pub progress: serde_json::Value,
    pub outcome: Option<SurveyOutcome>,
}

pub async fn get_survey_handler(Path(run_id): Path<String>) -> Result<Json<SurveyStatus>, StatusCode> {
    let manager = get_survey_manager(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SurveyStatus {
        progress: manager.progress.to_progress_json(),
        outcome: manager.outcome(),
    }))
}

/// Progress snapshot followed by live survey events until the run settles
pub async fn survey_events_handler(
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let manager = get_survey_manager(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    // Subscribe before checking for completion so the final event cannot slip past
    let mut rx = manager.events.subscribe();

    let stream = async_stream::stream! {
        if let Ok(event) = Event::default()
            .event("progress")
            .json_data(manager.progress.to_progress_json())
        {
            yield Ok(event);
        }

        if !manager.is_settled() {
            loop {
                match rx.recv().await {
                    Ok(survey_event) => {
                        let last = matches!(
                            survey_event,
                            SurveyEvent::Finished { .. } | SurveyEvent::Failed { .. }
                        );
                        if let Ok(event) = Event::default().event("survey").json_data(&survey_event) {
                            yield Ok(event);
                        }
                        if last {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event stream for {} skipped {} events", manager.run_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn cancel_survey_handler(Path(run_id): Path<String>) -> StatusCode {
    match cancel_survey(&run_id) {
        Some(true) => StatusCode::ACCEPTED,
        Some(false) => StatusCode::CONFLICT,
        None => StatusCode::NOT_FOUND,
    }
}

pub async fn survey_plan_handler(Path(run_id): Path<String>) -> Result<Json<PlanOutput>, StatusCode> {
    let manager = get_survey_manager(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    let outcome = manager.outcome().ok_or(StatusCode::CONFLICT)?;
    Ok(Json(PlanOutput {
        zones: outcome.zones,
        plan: outcome.plan,
    }))
}

/// A zone with its display anchor and drawable outline
#[derive(Serialize)]
pub struct ZoneView {
    pub zone: TreatmentZone,
    pub center: GeoPoint,
    pub outline: Vec<GeoPoint>,
}

pub async fn survey_zones_handler(
    Path(run_id): Path<String>,
) -> Result<Json<Vec<ZoneView>>, StatusCode> {
    let manager = get_survey_manager(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    let outcome = manager.outcome().ok_or(StatusCode::CONFLICT)?;
    Ok(Json(
        outcome
            .zones
            .into_iter()
            .map(|zone| ZoneView {
                center: zone_center(&zone),
                outline: zone_outline(&zone),
                zone,
            })
            .collect(),
    ))
}

/// `start`, `complete` or `fail` the plan of a finished run
pub async fn plan_status_handler(
    Path((run_id, action)): Path<(String, String)>,
) -> Result<Json<TreatmentPlan>, StatusCode> {
    let manager = get_survey_manager(&run_id).ok_or(StatusCode::NOT_FOUND)?;
    let result = match action.as_str() {
        "start" => manager.update_plan(TreatmentPlan::start),
        "complete" => manager.update_plan(TreatmentPlan::complete),
        "fail" => manager.update_plan(TreatmentPlan::fail),
        _ => return Err(StatusCode::NOT_FOUND),
    };

    match result {
        Ok(Some(plan)) => Ok(Json(plan)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(PlanUpdateError::NotSettled) | Err(PlanUpdateError::Plan(_)) => Err(StatusCode::CONFLICT),
        Err(PlanUpdateError::Other(e)) => {
            tracing::error!("Failed to update plan for {}: {:#}", run_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn default_mock_count() -> usize {
    50
}

#[derive(Deserialize)]
pub struct MockRequest {
    pub base: GeoPoint,
    #[serde(default = "default_mock_count")]
    pub count: usize,
    pub seed: Option<u64>,
}

pub async fn mock_detections_handler(Json(payload): Json<MockRequest>) -> Json<Vec<Detection>> {
    let seed = payload.seed.unwrap_or_else(rand::random);
    Json(mock_detections(payload.base, payload.count, seed))
}

#[derive(Deserialize)]
pub struct PlanRequest {
    pub detections: Vec<Detection>,
    pub method: Option<TreatmentMethod>,
}

pub async fn generate_plan_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlanRequest>,
) -> Json<PlanOutput> {
    let config = &state.env.config;
    let method = payload.method.unwrap_or(config.default_method);
    Json(generate_plan(&payload.detections, method, &config.planning))
}

pub async fn estimate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlanRequest>,
) -> Json<TreatmentStats> {
    let config = &state.env.config;
    let method = payload.method.unwrap_or(config.default_method);
    Json(estimate(&payload.detections, method, &config.planning))
}

#[derive(Serialize)]
pub struct RunInfo {
    pub name: String,
    pub metadata: RunMetadata,
    /// Exported plan, as last written to plan.json
    pub plan: Option<TreatmentPlan>,
}

pub async fn get_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunInfo>> {
    let runs = list_runs(&state.env.output_root).unwrap_or_default();

    let info_list = runs
        .into_iter()
        .map(|(name, metadata)| {
            let plan = match load_run_plan(&metadata) {
                Ok(document) => document.map(|d| d.plan),
                Err(e) => {
                    tracing::warn!("Skipping unreadable plan for run {}: {:#}", name, e);
                    None
                }
            };
            RunInfo {
                name,
                metadata,
                plan,
            }
        })
        .collect();

    Json(info_list)
}
