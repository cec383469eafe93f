// Flight simulation scheduler
//
// `FlightSimulator` is the Idle -> Running -> {Completed | Cancelled} state
// machine; it advances exactly one path point per `step`. `drive` runs it on
// a tokio interval and forwards detections to the persistence backend
// without blocking the tick loop.

use crate::store::{DetectionRecord, SurveyStore};
use crate::survey::coverage::CoverageCell;
use crate::survey::detection::DetectionModel;
use crate::survey::geometry::distance_to_boundary_m;
use crate::survey::scenario::FieldScenario;
use crate::survey::types::{
    Detection, EnvironmentalConditions, GeoPoint, SimulationState, SurveyProgress,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

lazy_static::lazy_static! {
    // Shared by every run in the process; starts at the launch time in ms * 1000
    static ref NEXT_DETECTION_ID: AtomicU64 =
        AtomicU64::new(Utc::now().timestamp_millis().max(0) as u64 * 1000);
}

/// Allocate a detection id, unique across all runs of this process
pub fn next_detection_id() -> u64 {
    NEXT_DETECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("coverage path is empty")]
    EmptyPath,
    #[error("a simulation run is already in progress")]
    AlreadyRunning,
    #[error("no simulation run is in progress")]
    NotRunning,
}

/// Cooperative cancellation flag, observed at the start of every tick.
/// Once set it stays set, so a cancel issued before `start` still wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub detection: Option<Detection>,
    pub state: SimulationState,
}

pub struct FlightSimulator {
    state: SimulationState,
    polygon: Vec<GeoPoint>,
    path: Vec<CoverageCell>,
    cursor: usize,
    conditions: EnvironmentalConditions,
    model: DetectionModel,
    scenario: FieldScenario,
    specimen_tolerance_degrees: f64,
    rng: StdRng,
    detections: Vec<Detection>,
    cancel: CancelToken,
}

impl FlightSimulator {
    pub fn new(
        polygon: Vec<GeoPoint>,
        model: DetectionModel,
        scenario: FieldScenario,
        specimen_tolerance_degrees: f64,
        seed: u64,
    ) -> Self {
        Self {
            state: SimulationState::Idle,
            polygon,
            path: Vec::new(),
            cursor: 0,
            conditions: EnvironmentalConditions::default(),
            model,
            scenario,
            specimen_tolerance_degrees,
            rng: StdRng::seed_from_u64(seed),
            detections: Vec::new(),
            cancel: CancelToken::default(),
        }
    }

    /// Begin a run over `path` with a snapshot of `conditions`.
    pub fn start(
        &mut self,
        path: Vec<CoverageCell>,
        conditions: EnvironmentalConditions,
    ) -> Result<(), SimulationError> {
        if self.state == SimulationState::Running {
            return Err(SimulationError::AlreadyRunning);
        }
        if path.is_empty() {
            return Err(SimulationError::EmptyPath);
        }

        self.path = path;
        self.cursor = 0;
        self.conditions = conditions;
        self.detections.clear();
        self.state = SimulationState::Running;
        Ok(())
    }

    /// Evaluate the next path point. The run completes on the step that
    /// consumes the last point; a pending cancel wins over the next point.
    pub fn step(&mut self) -> Result<Step, SimulationError> {
        if self.state != SimulationState::Running {
            return Err(SimulationError::NotRunning);
        }

        if self.cancel.is_cancelled() {
            self.state = SimulationState::Cancelled;
            return Ok(Step {
                detection: None,
                state: self.state,
            });
        }

        let Some(cell) = self.path.get(self.cursor).copied() else {
            self.state = SimulationState::Completed;
            return Ok(Step {
                detection: None,
                state: self.state,
            });
        };
        self.cursor += 1;

        let specimen = self
            .scenario
            .specimen_near(cell.point, self.specimen_tolerance_degrees);
        let edge_distance_m = distance_to_boundary_m(cell.point, &self.polygon);
        let outcome = self.model.detect(
            cell.point,
            edge_distance_m,
            &self.conditions,
            specimen,
            &mut self.rng,
        );

        let detection = outcome.detected.then(|| Detection {
            id: next_detection_id(),
            position: specimen.map(|s| s.position).unwrap_or(cell.point),
            confidence: outcome.confidence,
            timestamp: Utc::now(),
        });
        if let Some(d) = &detection {
            self.detections.push(d.clone());
        }

        if self.cursor == self.path.len() {
            self.state = SimulationState::Completed;
        }

        Ok(Step {
            detection,
            state: self.state,
        })
    }

    /// Handle for requesting cancellation; takes effect at the next tick boundary
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn into_detections(self) -> Vec<Detection> {
        self.detections
    }
}

/// Events published while a run is driven
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SurveyEvent {
    Detection { detection: Detection },
    CoverageComplete { detections: usize },
    Cancelled { detections: usize },
    /// Plan and artifacts are settled; published by the orchestrator
    Finished { plan_id: Option<String> },
    Failed { error: String },
}

/// Collaborators for one driven run
pub struct DriveContext {
    /// Zero means "as fast as the runtime allows"
    pub tick: Duration,
    /// How long to wait for queued detections after the flight ends
    pub drain_timeout: Duration,
    pub store: Arc<dyn SurveyStore>,
    pub progress: Arc<SurveyProgress>,
    pub events: broadcast::Sender<SurveyEvent>,
}

#[derive(Debug, Clone)]
pub struct SurveyRun {
    pub state: SimulationState,
    pub detections: Vec<Detection>,
}

/// Drive `simulator` over `path` to a terminal state.
///
/// An empty path completes immediately with no detections. Detections are
/// queued to a forwarding task. The queue is drained before returning, even
/// after a cancel, for at most `drain_timeout`; records still pending then are
/// abandoned and counted as forwarding failures like any rejected record.
pub async fn drive(
    mut simulator: FlightSimulator,
    path: Vec<CoverageCell>,
    conditions: EnvironmentalConditions,
    ctx: DriveContext,
) -> Result<SurveyRun, SimulationError> {
    match simulator.start(path, conditions) {
        Ok(()) => {}
        Err(SimulationError::EmptyPath) => {
            tracing::info!(
                "Run {}: coverage path is empty, nothing to survey",
                ctx.progress.run_id
            );
            ctx.progress.set_state(SimulationState::Completed);
            let _ = ctx.events.send(SurveyEvent::CoverageComplete { detections: 0 });
            return Ok(SurveyRun {
                state: SimulationState::Completed,
                detections: Vec::new(),
            });
        }
        Err(e) => return Err(e),
    }
    ctx.progress.set_state(SimulationState::Running);

    let (tx, mut rx) = mpsc::unbounded_channel::<DetectionRecord>();
    let store = ctx.store.clone();
    let forward_progress = ctx.progress.clone();
    let settled = Arc::new(AtomicUsize::new(0));
    let forward_settled = settled.clone();
    let mut forwarder = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let id = record.id;
            match store.submit_detection(record).await {
                Ok(()) => tracing::debug!("Forwarded detection {}", id),
                Err(e) => {
                    forward_progress
                        .forwarding_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Failed to forward detection {}: {:#}", id, e);
                }
            }
            forward_settled.fetch_add(1, Ordering::Relaxed);
        }
    });

    let mut ticker = (!ctx.tick.is_zero()).then(|| tokio::time::interval(ctx.tick));
    loop {
        match ticker.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => tokio::task::yield_now().await,
        }

        let start_inst = Instant::now();
        let step = simulator.step()?;
        if let Some(detection) = step.detection {
            // Receiver lives until the sender is dropped below
            let _ = tx.send(DetectionRecord::from(&detection));
            let _ = ctx.events.send(SurveyEvent::Detection { detection });
        }
        ctx.progress
            .detections
            .store(simulator.detections().len(), Ordering::Relaxed);
        let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        ctx.progress.update_tick(simulator.cursor(), duration_ms);

        if step.state.is_terminal() {
            break;
        }
    }

    drop(tx);
    match tokio::time::timeout(ctx.drain_timeout, &mut forwarder).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Detection forwarder failed: {}", e),
        Err(_) => {
            forwarder.abort();
            let pending = simulator
                .detections()
                .len()
                .saturating_sub(settled.load(Ordering::Relaxed));
            ctx.progress
                .forwarding_failures
                .fetch_add(pending, Ordering::Relaxed);
            tracing::warn!(
                "Run {}: backend did not settle within {:?}, abandoning {} queued detections",
                ctx.progress.run_id,
                ctx.drain_timeout,
                pending
            );
        }
    }

    let final_state = simulator.state();
    let detections = simulator.into_detections();
    ctx.progress.set_state(final_state);
    let event = match final_state {
        SimulationState::Cancelled => {
            tracing::info!(
                "Run {} cancelled after {} detections",
                ctx.progress.run_id,
                detections.len()
            );
            SurveyEvent::Cancelled {
                detections: detections.len(),
            }
        }
        _ => {
            tracing::info!(
                "Run {} coverage complete with {} detections",
                ctx.progress.run_id,
                detections.len()
            );
            SurveyEvent::CoverageComplete {
                detections: detections.len(),
            }
        }
    };
    let _ = ctx.events.send(event);

    Ok(SurveyRun {
        state: final_state,
        detections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, PlanSubmission, StoredPlan};
    use crate::survey::coverage::build_coverage_path;
    use crate::survey::geometry::meters_to_degrees;
    use anyhow::Result;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    fn square_field(side_m: f64) -> Vec<GeoPoint> {
        let side = meters_to_degrees(side_m);
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, side),
            GeoPoint::new(side, side),
            GeoPoint::new(side, 0.0),
        ]
    }

    fn simulator_for(polygon: &[GeoPoint], path: &[CoverageCell], seed: u64) -> FlightSimulator {
        let cell = meters_to_degrees(10.0);
        FlightSimulator::new(
            polygon.to_vec(),
            DetectionModel::default(),
            FieldScenario::uniform(path, 1.0, 4),
            cell / 2.0,
            seed,
        )
    }

    fn context(store: Arc<dyn SurveyStore>, cells: usize) -> DriveContext {
        let (events, _) = broadcast::channel(64);
        DriveContext {
            tick: Duration::ZERO,
            drain_timeout: Duration::from_secs(5),
            store,
            progress: Arc::new(SurveyProgress::new("test".to_string(), cells)),
            events,
        }
    }

    struct FailingStore;

    /// Accepts every request and never answers
    struct StalledStore;

    impl SurveyStore for StalledStore {
        fn submit_detection(&self, _record: DetectionRecord) -> BoxFuture<'_, Result<()>> {
            futures::future::pending::<Result<()>>().boxed()
        }

        fn submit_plan(&self, _submission: PlanSubmission) -> BoxFuture<'_, Result<StoredPlan>> {
            futures::future::pending::<Result<StoredPlan>>().boxed()
        }
    }

    impl SurveyStore for FailingStore {
        fn submit_detection(&self, _record: DetectionRecord) -> BoxFuture<'_, Result<()>> {
            async { Err::<(), _>(anyhow::anyhow!("backend unreachable")) }.boxed()
        }

        fn submit_plan(&self, _submission: PlanSubmission) -> BoxFuture<'_, Result<StoredPlan>> {
            async { Err::<StoredPlan, _>(anyhow::anyhow!("backend unreachable")) }.boxed()
        }
    }

    fn run_to_end(sim: &mut FlightSimulator) -> Vec<Detection> {
        let mut detections = Vec::new();
        loop {
            let step = sim.step().unwrap();
            detections.extend(step.detection);
            if step.state.is_terminal() {
                return detections;
            }
        }
    }

    #[test]
    fn test_start_preconditions() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let mut sim = simulator_for(&polygon, &path, 1);

        assert_eq!(sim.step(), Err(SimulationError::NotRunning));
        assert_eq!(
            sim.start(Vec::new(), EnvironmentalConditions::default()),
            Err(SimulationError::EmptyPath)
        );
        assert_eq!(sim.state(), SimulationState::Idle);

        sim.start(path.clone(), EnvironmentalConditions::default()).unwrap();
        assert_eq!(
            sim.start(path, EnvironmentalConditions::default()),
            Err(SimulationError::AlreadyRunning)
        );
        assert_eq!(sim.state(), SimulationState::Running);
    }

    #[test]
    fn test_forty_metre_field_is_reproducible() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        assert_eq!(path.len(), 16);

        let run = |seed: u64| {
            let mut sim = simulator_for(&polygon, &path, seed);
            sim.start(path.clone(), EnvironmentalConditions::default()).unwrap();
            let detections = run_to_end(&mut sim);
            assert_eq!(sim.state(), SimulationState::Completed);
            assert_eq!(sim.cursor(), 16);
            detections
        };

        let first = run(2024);
        let second = run(2024);
        let positions = |d: &[Detection]| {
            d.iter()
                .map(|d| (d.position, d.confidence))
                .collect::<Vec<_>>()
        };

        assert_eq!(positions(&first), positions(&second));
        assert!(first.len() <= 16);
        assert!(first.iter().all(|d| d.confidence >= 0.3));
        // Ids increase in emission order and are never reused by a later run
        assert!(first.windows(2).all(|w| w[0].id < w[1].id));
        if let (Some(a), Some(b)) = (first.last(), second.first()) {
            assert!(a.id < b.id);
        }
    }

    #[test]
    fn test_completes_on_last_point() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let mut sim = simulator_for(&polygon, &path, 3);
        sim.start(path, EnvironmentalConditions::default()).unwrap();

        for _ in 0..15 {
            assert_eq!(sim.step().unwrap().state, SimulationState::Running);
        }
        assert_eq!(sim.step().unwrap().state, SimulationState::Completed);
        assert_eq!(sim.step(), Err(SimulationError::NotRunning));
    }

    #[test]
    fn test_cancel_takes_effect_at_next_tick() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let mut sim = simulator_for(&polygon, &path, 4);
        sim.start(path, EnvironmentalConditions::default()).unwrap();

        let mut before = Vec::new();
        for _ in 0..5 {
            before.extend(sim.step().unwrap().detection);
        }
        sim.cancel_token().cancel();

        let step = sim.step().unwrap();
        assert_eq!(step.state, SimulationState::Cancelled);
        assert!(step.detection.is_none());
        assert_eq!(sim.cursor(), 5);
        assert_eq!(sim.step(), Err(SimulationError::NotRunning));
        assert_eq!(sim.detections(), before.as_slice());
    }

    #[tokio::test]
    async fn test_drive_forwards_every_detection() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let store = Arc::new(InMemoryStore::default());
        let ctx = context(store.clone(), path.len());
        let progress = ctx.progress.clone();
        let mut events = ctx.events.subscribe();

        let run = drive(
            simulator_for(&polygon, &path, 5),
            path,
            EnvironmentalConditions::default(),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(run.state, SimulationState::Completed);
        let forwarded: Vec<u64> = store.detections().iter().map(|r| r.id).collect();
        let local: Vec<u64> = run.detections.iter().map(|d| d.id).collect();
        assert_eq!(forwarded, local);
        assert_eq!(progress.state(), SimulationState::Completed);
        assert_eq!(progress.cursor.load(Ordering::Relaxed), 16);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(SurveyEvent::CoverageComplete { detections }) if detections == run.detections.len()
        ));
    }

    #[tokio::test]
    async fn test_drive_survives_forwarding_failures() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let ctx = context(Arc::new(FailingStore), path.len());
        let progress = ctx.progress.clone();

        let run = drive(
            simulator_for(&polygon, &path, 6),
            path,
            EnvironmentalConditions::default(),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(run.state, SimulationState::Completed);
        assert_eq!(
            progress.forwarding_failures.load(Ordering::Relaxed),
            run.detections.len()
        );
    }

    #[tokio::test]
    async fn test_drive_empty_path_completes_immediately() {
        let polygon = square_field(40.0);
        let store = Arc::new(InMemoryStore::default());
        let run = drive(
            simulator_for(&polygon, &[], 7),
            Vec::new(),
            EnvironmentalConditions::default(),
            context(store.clone(), 0),
        )
        .await
        .unwrap();

        assert_eq!(run.state, SimulationState::Completed);
        assert!(run.detections.is_empty());
        assert!(store.detections().is_empty());
    }

    #[tokio::test]
    async fn test_drive_cancelled_run_keeps_committed_detections() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let store = Arc::new(InMemoryStore::default());
        let sim = simulator_for(&polygon, &path, 8);

        // Cancel as soon as the first detection is published
        let ctx = context(store.clone(), path.len());
        let mut events = ctx.events.subscribe();
        let token = sim.cancel_token();
        let handle = tokio::spawn(drive(sim, path, EnvironmentalConditions::default(), ctx));
        while let Ok(event) = events.recv().await {
            if matches!(event, SurveyEvent::Detection { .. }) {
                token.cancel();
            }
            if matches!(
                event,
                SurveyEvent::Cancelled { .. } | SurveyEvent::CoverageComplete { .. }
            ) {
                break;
            }
        }

        let run = handle.await.unwrap().unwrap();
        let forwarded: Vec<u64> = store.detections().iter().map(|r| r.id).collect();
        let local: Vec<u64> = run.detections.iter().map(|d| d.id).collect();
        assert_eq!(forwarded, local);
        assert!(run.detections.len() <= 16);
    }

    #[tokio::test]
    async fn test_runs_sharing_a_backend_get_distinct_ids() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let store = Arc::new(InMemoryStore::default());

        let mut total = 0;
        for seed in [11, 12] {
            let run = drive(
                simulator_for(&polygon, &path, seed),
                path.clone(),
                EnvironmentalConditions::default(),
                context(store.clone(), path.len()),
            )
            .await
            .unwrap();
            total += run.detections.len();
        }

        let ids: std::collections::HashSet<u64> =
            store.detections().iter().map(|r| r.id).collect();
        assert_eq!(store.detections().len(), total);
        assert_eq!(ids.len(), total);
    }

    #[tokio::test]
    async fn test_drive_finishes_when_backend_never_answers() {
        let polygon = square_field(40.0);
        let path = build_coverage_path(&polygon, meters_to_degrees(10.0));
        let mut ctx = context(Arc::new(StalledStore), path.len());
        ctx.drain_timeout = Duration::from_millis(50);
        let progress = ctx.progress.clone();
        let mut events = ctx.events.subscribe();

        let run = tokio::time::timeout(
            Duration::from_secs(5),
            drive(
                simulator_for(&polygon, &path, 9),
                path,
                EnvironmentalConditions::default(),
                ctx,
            ),
        )
        .await
        .expect("drive should not wait on a stalled backend")
        .unwrap();

        assert_eq!(run.state, SimulationState::Completed);
        assert_eq!(progress.cursor.load(Ordering::Relaxed), 16);
        assert_eq!(
            progress.forwarding_failures.load(Ordering::Relaxed),
            run.detections.len()
        );

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(SurveyEvent::CoverageComplete { .. })));
    }
}
