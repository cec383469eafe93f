use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;

pub use crate::run_artifacts::{Bounds, Detection, GeoPoint};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum Weather {
    #[default]
    Clear,
    Cloudy,
    LightRain,
    HeavyRain,
    Windy,
    Foggy,
}

/// Ambient conditions for one run. Snapshotted at start and never re-read.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EnvironmentalConditions {
    pub weather: Weather,
    pub wind_speed_kph: f64,
    pub drone_altitude_m: f64,
}

impl Default for EnvironmentalConditions {
    fn default() -> Self {
        Self {
            weather: Weather::Clear,
            wind_speed_kph: 0.0,
            drone_altitude_m: 10.0,
        }
    }
}

/// A simulated plant placed in the field at scenario setup
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PlantSpecimen {
    pub position: GeoPoint,
    /// In [0, 1]
    pub detectability: f64,
    /// In 0..=4
    pub growth_stage: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl SimulationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationState::Completed | SimulationState::Cancelled)
    }
}

/// Run progress shared between the scheduler task and the HTTP/CLI readers
#[derive(Debug)]
pub struct SurveyProgress {
    pub run_id: String,
    pub total_cells: usize,
    pub cursor: AtomicUsize,
    pub detections: AtomicUsize,
    /// Forwarding attempts the persistence backend rejected
    pub forwarding_failures: AtomicUsize,
    pub state: RwLock<SimulationState>,
    pub error: RwLock<Option<String>>,
    pub ms_per_tick: RwLock<f64>,
    pub start_time: Instant,
}

impl SurveyProgress {
    pub fn new(run_id: String, total_cells: usize) -> Self {
        Self {
            run_id,
            total_cells,
            cursor: AtomicUsize::new(0),
            detections: AtomicUsize::new(0),
            forwarding_failures: AtomicUsize::new(0),
            state: RwLock::new(SimulationState::Idle),
            error: RwLock::new(None),
            ms_per_tick: RwLock::new(0.0),
            start_time: Instant::now(),
        }
    }

    pub fn update_tick(&self, cursor: usize, ms_per_tick: f64) {
        self.cursor.store(cursor, Ordering::Relaxed);
        if let Ok(mut avg) = self.ms_per_tick.write() {
            // Simple exponential moving average for smoothing durations
            if *avg == 0.0 {
                *avg = ms_per_tick;
            } else {
                *avg = *avg * 0.9 + ms_per_tick * 0.1;
            }
        }
    }

    pub fn set_state(&self, state: SimulationState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    pub fn state(&self) -> SimulationState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(SimulationState::Idle)
    }

    pub fn set_error(&self, message: String) {
        if let Ok(mut error) = self.error.write() {
            *error = Some(message);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
            || self.error.read().map(|e| e.is_some()).unwrap_or(false)
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let cursor = self.cursor.load(Ordering::Relaxed);
        let percent = if self.total_cells > 0 {
            cursor as f64 / self.total_cells as f64 * 100.0
        } else {
            100.0
        };

        serde_json::json!({
            "run_id": self.run_id,
            "state": self.state(),
            "cursor": cursor,
            "total_cells": self.total_cells,
            "percent": percent,
            "detections": self.detections.load(Ordering::Relaxed),
            "forwarding_failures": self.forwarding_failures.load(Ordering::Relaxed),
            "ms_per_tick": self.ms_per_tick.read().map(|v| *v).unwrap_or(0.0),
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
            "error": self.error.read().ok().and_then(|e| e.clone()),
        })
    }
}
