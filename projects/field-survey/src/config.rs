use crate::run_artifacts::TreatmentMethod;
use crate::survey::types::Weather;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Detection probability multiplier per weather condition
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WeatherTable {
    pub clear: f64,
    pub cloudy: f64,
    pub light_rain: f64,
    pub heavy_rain: f64,
    pub windy: f64,
    pub foggy: f64,
}

impl Default for WeatherTable {
    fn default() -> Self {
        Self {
            clear: 1.0,
            cloudy: 0.9,
            light_rain: 0.7,
            heavy_rain: 0.4,
            windy: 0.85,
            foggy: 0.5,
        }
    }
}

impl WeatherTable {
    pub fn modifier(&self, weather: Weather) -> f64 {
        match weather {
            Weather::Clear => self.clear,
            Weather::Cloudy => self.cloudy,
            Weather::LightRain => self.light_rain,
            Weather::HeavyRain => self.heavy_rain,
            Weather::Windy => self.windy,
            Weather::Foggy => self.foggy,
        }
    }
}

/// Linear cost model for one treatment method:
/// `cost = base_cost + chemical * chemical_price + minutes / 60 * labor_rate`.
///
/// The units of `chemical_rate` and `minutes_rate` depend on the method
/// (per weed, per zone, per m² or per √m²).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MethodRates {
    pub chemical_rate: f64,
    pub minutes_rate: f64,
    pub base_cost: f64,
    pub chemical_price: f64,
    pub labor_rate: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CostModel {
    /// liters per weed, minutes per weed
    pub precision: MethodRates,
    /// liters per weed, minutes per zone
    pub zone: MethodRates,
    /// liters per m², minutes per √m²
    pub broadcast: MethodRates,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            precision: MethodRates {
                chemical_rate: 0.05,
                minutes_rate: 1.0,
                base_cost: 10.0,
                chemical_price: 20.0,
                labor_rate: 30.0,
            },
            zone: MethodRates {
                chemical_rate: 0.1,
                minutes_rate: 5.0,
                base_cost: 20.0,
                chemical_price: 15.0,
                labor_rate: 20.0,
            },
            broadcast: MethodRates {
                chemical_rate: 0.002,
                minutes_rate: 0.5,
                base_cost: 30.0,
                chemical_price: 10.0,
                labor_rate: 10.0,
            },
        }
    }
}

impl CostModel {
    pub fn rates(&self, method: TreatmentMethod) -> &MethodRates {
        match method {
            TreatmentMethod::Precision => &self.precision,
            TreatmentMethod::Zone => &self.zone,
            TreatmentMethod::Broadcast => &self.broadcast,
        }
    }
}

/// Clustering and zone-shaping parameters
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlanningConfig {
    pub proximity_threshold_m: f64,
    /// Bounds buffer for rectangle/hull zones (0.00005° is roughly 5 m)
    pub zone_buffer_degrees: f64,
    pub precision_spot_radius_m: f64,
    pub singleton_spot_radius_m: f64,
    pub high_density_threshold: usize,
    pub cost: CostModel,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 10.0,
            zone_buffer_degrees: 0.00005,
            precision_spot_radius_m: 2.0,
            singleton_spot_radius_m: 3.0,
            high_density_threshold: 5,
            cost: CostModel::default(),
        }
    }
}

/// Engine configuration. Every field is optional in the JSON file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SurveyConfig {
    /// Coverage grid resolution (roughly 10 m at the default)
    pub cell_size_degrees: f64,
    pub acceptance_threshold: f64,
    /// Distance from the boundary at which the edge modifier saturates
    pub edge_falloff_m: f64,
    pub tick_interval_ms: u64,
    /// Per-request timeout for the HTTP persistence backend
    pub backend_timeout_ms: u64,
    /// Upper bound on waiting for queued detections once the flight ends
    pub forward_drain_timeout_ms: u64,
    /// How long settled runs stay in the in-process registry
    pub registry_retention_secs: u64,
    pub drone_speed_mps: f64,
    pub default_method: TreatmentMethod,
    pub weather: WeatherTable,
    pub planning: PlanningConfig,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            cell_size_degrees: 0.00009,
            acceptance_threshold: 0.3,
            edge_falloff_m: 20.0,
            tick_interval_ms: 250,
            backend_timeout_ms: 10_000,
            forward_drain_timeout_ms: 5_000,
            registry_retention_secs: 3_600,
            drone_speed_mps: 5.0,
            default_method: TreatmentMethod::Zone,
            weather: WeatherTable::default(),
            planning: PlanningConfig::default(),
        }
    }
}

impl SurveyConfig {
    /// Load from an optional JSON file, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SurveyConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        tracing::info!("Loaded survey config from {:?}", path);
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn forward_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_drain_timeout_ms)
    }

    pub fn registry_retention(&self) -> Duration {
        Duration::from_secs(self.registry_retention_secs)
    }
}
