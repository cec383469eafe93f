// Survey orchestrator: manages simulation run lifecycle
//
// Prepares a run (coverage path, scenario, output directory), drives the
// flight simulator on a tokio task, then turns the detections into a
// treatment plan, hands it to the persistence backend and writes the run
// artifacts. Active runs, and settled runs for a retention period, stay in a
// process-wide registry; older runs are served from disk only.

use crate::config::SurveyConfig;
use crate::planning::plan::{generate_plan, validate_plan, PlanError};
use crate::run_artifacts::{Detection, GeoPoint, TreatmentMethod, TreatmentPlan, TreatmentZone};
use crate::run_artifacts::PlanDocument;
use crate::run_context::{create_run, export_plan, write_run_artifacts, RunMetadata, PLAN_FILE};
use crate::store::SurveyStore;
use crate::survey::coverage::{build_coverage_path, CoverageCell};
use crate::survey::detection::DetectionModel;
use crate::survey::scenario::FieldScenario;
use crate::survey::scheduler::{
    drive, CancelToken, DriveContext, FlightSimulator, SurveyEvent, SurveyRun,
};
use crate::survey::types::{EnvironmentalConditions, SimulationState, SurveyProgress};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Specimens per coverage cell when the request does not say
const DEFAULT_SPECIMENS_PER_CELL: f64 = 0.5;

// Global registry of survey runs
lazy_static::lazy_static! {
    static ref SURVEY_REGISTRY: RwLock<HashMap<String, Arc<SurveyManager>>> =
        RwLock::new(HashMap::new());
    static ref RUN_SEQUENCE: AtomicUsize = AtomicUsize::new(0);
}

/// One survey to simulate. Loaded from JSON by both the CLI and the API.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SurveyRequest {
    pub polygon: Vec<GeoPoint>,
    #[serde(default)]
    pub conditions: EnvironmentalConditions,
    pub method: Option<TreatmentMethod>,
    pub seed: Option<u64>,
    pub specimen_count: Option<usize>,
}

/// Shared collaborators for every run
#[derive(Clone)]
pub struct SurveyEnvironment {
    pub config: Arc<SurveyConfig>,
    pub store: Arc<dyn SurveyStore>,
    pub output_root: PathBuf,
}

#[derive(Serialize, Debug, Clone)]
pub struct SurveyOutcome {
    pub state: SimulationState,
    pub detections: Vec<Detection>,
    pub zones: Vec<TreatmentZone>,
    pub plan: Option<TreatmentPlan>,
}

/// Manager that holds state and control handles for a run
pub struct SurveyManager {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub progress: Arc<SurveyProgress>,
    pub cancel: CancelToken,
    pub events: broadcast::Sender<SurveyEvent>,
    outcome: RwLock<Option<SurveyOutcome>>,
    settled_at: RwLock<Option<Instant>>,
}

impl SurveyManager {
    pub fn outcome(&self) -> Option<SurveyOutcome> {
        self.outcome.read().ok().and_then(|o| o.clone())
    }

    /// True once the outcome is recorded or the run has failed
    pub fn is_settled(&self) -> bool {
        self.outcome.read().map(|o| o.is_some()).unwrap_or(false)
            || self.progress.error.read().map(|e| e.is_some()).unwrap_or(false)
    }

    pub fn settled_at(&self) -> Option<Instant> {
        self.settled_at.read().ok().and_then(|t| *t)
    }

    fn mark_settled(&self) {
        if let Ok(mut at) = self.settled_at.write() {
            *at = Some(Instant::now());
        }
    }

    fn set_outcome(&self, outcome: SurveyOutcome) {
        let plan_id = outcome.plan.as_ref().map(|p| p.id.clone());
        // Settle time is visible no later than the outcome
        self.mark_settled();
        if let Ok(mut current) = self.outcome.write() {
            *current = Some(outcome);
        }
        let _ = self.events.send(SurveyEvent::Finished { plan_id });
    }

    fn set_failed(&self, error: String) {
        self.progress.set_error(error.clone());
        self.mark_settled();
        let _ = self.events.send(SurveyEvent::Failed { error });
    }

    /// Apply a status transition to the run's plan and re-export plan.json
    pub fn update_plan<F>(&self, transition: F) -> Result<Option<TreatmentPlan>, PlanUpdateError>
    where
        F: FnOnce(&mut TreatmentPlan) -> Result<(), PlanError>,
    {
        let document = {
            let mut guard = self
                .outcome
                .write()
                .map_err(|_| PlanUpdateError::Other(anyhow::anyhow!("outcome lock poisoned")))?;
            let outcome = guard.as_mut().ok_or(PlanUpdateError::NotSettled)?;
            let Some(plan) = outcome.plan.as_mut() else {
                return Ok(None);
            };
            transition(plan)?;
            PlanDocument {
                plan: plan.clone(),
                detections: outcome.detections.clone(),
            }
        };

        export_plan(&self.output_dir.join(PLAN_FILE), &document)
            .map_err(PlanUpdateError::Other)?;
        tracing::info!(
            "Plan {} for run {} is now {:?}",
            document.plan.id,
            self.run_id,
            document.plan.status
        );
        Ok(Some(document.plan))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanUpdateError {
    #[error("survey has not finished")]
    NotSettled,
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Other(anyhow::Error),
}

struct PreparedSurvey {
    metadata: RunMetadata,
    simulator: FlightSimulator,
    path: Vec<CoverageCell>,
    conditions: EnvironmentalConditions,
    method: TreatmentMethod,
}

pub fn get_survey_manager(run_id: &str) -> Option<Arc<SurveyManager>> {
    SURVEY_REGISTRY
        .read()
        .ok()
        .and_then(|registry| registry.get(run_id).cloned())
}

pub fn list_survey_managers() -> Vec<Arc<SurveyManager>> {
    SURVEY_REGISTRY
        .read()
        .map(|registry| registry.values().cloned().collect())
        .unwrap_or_default()
}

/// Drop runs that settled more than `retention` before `now`. Running runs
/// are always kept. Returns how many were evicted.
fn prune_settled(
    registry: &mut HashMap<String, Arc<SurveyManager>>,
    retention: Duration,
    now: Instant,
) -> usize {
    let before = registry.len();
    registry.retain(|_, manager| match manager.settled_at() {
        Some(at) => now.saturating_duration_since(at) < retention,
        None => true,
    });
    before - registry.len()
}

fn register_survey(manager: Arc<SurveyManager>, retention: Duration) {
    tracing::info!("Registering survey manager for run_id: {}", manager.run_id);
    if let Ok(mut registry) = SURVEY_REGISTRY.write() {
        let evicted = prune_settled(&mut registry, retention, Instant::now());
        if evicted > 0 {
            tracing::debug!("Evicted {} settled runs from the registry", evicted);
        }
        registry.insert(manager.run_id.clone(), manager);
    }
}

fn next_run_id() -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("survey-{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), seq)
}

fn prepare_survey(env: &SurveyEnvironment, request: SurveyRequest) -> Result<PreparedSurvey> {
    let config = &env.config;
    let run_id = next_run_id();
    let seed = request.seed.unwrap_or_else(rand::random);
    let method = request.method.unwrap_or(config.default_method);

    let path = build_coverage_path(&request.polygon, config.cell_size_degrees);
    let specimen_count = request
        .specimen_count
        .unwrap_or((path.len() as f64 * DEFAULT_SPECIMENS_PER_CELL).ceil() as usize);
    let scenario = FieldScenario::generate(&request.polygon, specimen_count, seed);
    tracing::info!(
        "Prepared run {}: {} path points, {} specimens, seed {}",
        run_id,
        path.len(),
        scenario.specimens.len(),
        seed
    );

    let metadata = create_run(
        &env.output_root,
        RunMetadata::new(
            &run_id,
            request.polygon.clone(),
            request.conditions,
            method,
            seed,
            path.len(),
        ),
    )?;

    let simulator = FlightSimulator::new(
        request.polygon,
        DetectionModel::from_config(config),
        scenario,
        config.cell_size_degrees / 2.0,
        seed,
    );

    Ok(PreparedSurvey {
        metadata,
        simulator,
        path,
        conditions: request.conditions,
        method,
    })
}

/// Start a survey in the background and return its manager
pub fn start_survey(env: SurveyEnvironment, request: SurveyRequest) -> Result<Arc<SurveyManager>> {
    let prepared = prepare_survey(&env, request)?;
    let run_id = prepared.metadata.run_id.clone();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let manager = Arc::new(SurveyManager {
        run_id: run_id.clone(),
        output_dir: prepared.metadata.output_dir.clone(),
        progress: Arc::new(SurveyProgress::new(run_id, prepared.path.len())),
        cancel: prepared.simulator.cancel_token(),
        events,
        outcome: RwLock::new(None),
        settled_at: RwLock::new(None),
    });
    register_survey(manager.clone(), env.config.registry_retention());

    let task_manager = manager.clone();
    tokio::spawn(async move {
        match execute_survey(&env, prepared, &task_manager).await {
            Ok(outcome) => task_manager.set_outcome(outcome),
            Err(e) => {
                tracing::error!("Survey {} failed: {:#}", task_manager.run_id, e);
                task_manager.set_failed(format!("{:#}", e));
            }
        }
    });

    Ok(manager)
}

async fn execute_survey(
    env: &SurveyEnvironment,
    prepared: PreparedSurvey,
    manager: &SurveyManager,
) -> Result<SurveyOutcome> {
    let PreparedSurvey {
        mut metadata,
        simulator,
        path,
        conditions,
        method,
    } = prepared;

    let ctx = DriveContext {
        tick: env.config.tick_interval(),
        drain_timeout: env.config.forward_drain_timeout(),
        store: env.store.clone(),
        progress: manager.progress.clone(),
        events: manager.events.clone(),
    };
    let SurveyRun { state, detections } = drive(simulator, path, conditions, ctx).await?;

    let mut zones = Vec::new();
    let mut plan = None;
    if state == SimulationState::Completed {
        let output = generate_plan(&detections, method, &env.config.planning);
        zones = output.zones;
        plan = output.plan;
    }

    if let Some(plan) = plan.as_mut() {
        submit_plan(env, plan, &metadata.run_id).await;
    }

    write_run_artifacts(&mut metadata, state, &detections, plan.as_ref())?;

    Ok(SurveyOutcome {
        state,
        detections,
        zones,
        plan,
    })
}

/// Hand a plan to the backend. Failures leave the local plan authoritative.
async fn submit_plan(env: &SurveyEnvironment, plan: &mut TreatmentPlan, run_id: &str) {
    if let Err(e) = validate_plan(plan) {
        tracing::warn!("Not submitting plan for run {}: {}", run_id, e);
        return;
    }

    match env.store.submit_plan(plan.to_submission()).await {
        Ok(stored) => {
            tracing::info!("Backend stored plan {} for run {}", stored.id, run_id);
            plan.adopt(stored);
        }
        Err(e) => tracing::warn!(
            "Failed to submit plan for run {}, keeping local copy: {:#}",
            run_id,
            e
        ),
    }
}

/// Request cancellation. Returns false for unknown or finished runs.
pub fn cancel_survey(run_id: &str) -> Option<bool> {
    let manager = get_survey_manager(run_id)?;
    if manager.progress.is_finished() {
        return Some(false);
    }
    tracing::info!("Cancelling survey {}", run_id);
    manager.cancel.cancel();
    Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::survey::geometry::meters_to_degrees;
    use std::time::Duration;

    fn environment(name: &str, store: Arc<InMemoryStore>) -> SurveyEnvironment {
        let config = SurveyConfig {
            cell_size_degrees: meters_to_degrees(10.0),
            tick_interval_ms: 0,
            ..SurveyConfig::default()
        };
        SurveyEnvironment {
            config: Arc::new(config),
            store,
            output_root: std::env::temp_dir().join(format!(
                "field-survey-orchestrator-{}-{}",
                name,
                std::process::id()
            )),
        }
    }

    fn request(side_m: f64) -> SurveyRequest {
        let side = meters_to_degrees(side_m);
        SurveyRequest {
            polygon: vec![
                GeoPoint::new(-0.689, 34.783),
                GeoPoint::new(-0.689, 34.783 + side),
                GeoPoint::new(-0.689 + side, 34.783 + side),
                GeoPoint::new(-0.689 + side, 34.783),
            ],
            conditions: EnvironmentalConditions::default(),
            method: Some(TreatmentMethod::Zone),
            seed: Some(99),
            specimen_count: Some(400),
        }
    }

    async fn wait_for_outcome(manager: &SurveyManager) -> SurveyOutcome {
        for _ in 0..500 {
            if let Some(outcome) = manager.outcome() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("survey {} did not finish", manager.run_id);
    }

    #[tokio::test]
    async fn test_survey_runs_to_plan() {
        let store = Arc::new(InMemoryStore::default());
        let env = environment("plan", store.clone());
        let manager = start_survey(env.clone(), request(60.0)).unwrap();
        assert!(get_survey_manager(&manager.run_id).is_some());

        let outcome = wait_for_outcome(&manager).await;
        assert_eq!(outcome.state, SimulationState::Completed);
        assert_eq!(store.detections().len(), outcome.detections.len());

        match &outcome.plan {
            Some(plan) => {
                assert_eq!(plan.total_weeds, outcome.detections.len());
                // Backend identity replaces the local one
                assert!(plan.id.starts_with("plan-"));
                assert_eq!(store.plans().len(), 1);

                let started = manager.update_plan(TreatmentPlan::start).unwrap().unwrap();
                assert_eq!(started.status, crate::run_artifacts::PlanStatus::InProgress);
                assert!(matches!(
                    manager.update_plan(TreatmentPlan::start),
                    Err(PlanUpdateError::Plan(PlanError::InvalidTransition { .. }))
                ));
                let exported = crate::run_context::import_plan(&manager.output_dir.join(PLAN_FILE)).unwrap();
                assert_eq!(exported.plan.status, crate::run_artifacts::PlanStatus::InProgress);
            }
            None => assert!(outcome.detections.is_empty()),
        }

        let run_dir = env.output_root.join(&manager.run_id);
        assert!(run_dir.join("metadata.json").exists());
        assert!(run_dir.join("detections.csv").exists());
        assert_eq!(cancel_survey(&manager.run_id), Some(false));
        std::fs::remove_dir_all(&env.output_root).ok();
    }

    #[tokio::test]
    async fn test_degenerate_polygon_completes_without_plan() {
        let store = Arc::new(InMemoryStore::default());
        let env = environment("degenerate", store.clone());
        let mut req = request(60.0);
        req.polygon.truncate(2);

        let manager = start_survey(env.clone(), req).unwrap();
        let outcome = wait_for_outcome(&manager).await;
        assert_eq!(outcome.state, SimulationState::Completed);
        assert!(outcome.detections.is_empty());
        assert!(outcome.plan.is_none());
        assert!(store.plans().is_empty());
        std::fs::remove_dir_all(&env.output_root).ok();
    }

    fn registered(run_id: &str, settled_at: Option<Instant>) -> Arc<SurveyManager> {
        let (events, _) = broadcast::channel(4);
        Arc::new(SurveyManager {
            run_id: run_id.to_string(),
            output_dir: PathBuf::new(),
            progress: Arc::new(SurveyProgress::new(run_id.to_string(), 0)),
            cancel: CancelToken::default(),
            events,
            outcome: RwLock::new(None),
            settled_at: RwLock::new(settled_at),
        })
    }

    #[test]
    fn test_prune_evicts_only_expired_settled_runs() {
        let start = Instant::now();
        let mut registry = HashMap::new();
        for manager in [
            registered("old", Some(start)),
            registered("running", None),
        ] {
            registry.insert(manager.run_id.clone(), manager);
        }
        let recent = registered("recent", Some(start + Duration::from_secs(90)));
        registry.insert(recent.run_id.clone(), recent);

        let now = start + Duration::from_secs(120);
        assert_eq!(prune_settled(&mut registry, Duration::from_secs(60), now), 1);
        assert!(!registry.contains_key("old"));
        assert!(registry.contains_key("running"));
        assert!(registry.contains_key("recent"));

        assert_eq!(prune_settled(&mut registry, Duration::from_secs(60), now), 0);
    }

    #[tokio::test]
    async fn test_finished_run_records_settle_time() {
        let store = Arc::new(InMemoryStore::default());
        let env = environment("settle", store);
        let manager = start_survey(env.clone(), request(30.0)).unwrap();

        wait_for_outcome(&manager).await;
        assert!(manager.settled_at().is_some());
        std::fs::remove_dir_all(&env.output_root).ok();
    }

    #[test]
    fn test_unknown_run_cannot_be_cancelled() {
        assert_eq!(cancel_survey("no-such-run"), None);
    }
}
