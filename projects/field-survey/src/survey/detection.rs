use crate::config::{SurveyConfig, WeatherTable};
use crate::survey::types::{EnvironmentalConditions, GeoPoint, PlantSpecimen};
use rand::Rng;

/// Result of evaluating one sample point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOutcome {
    pub detected: bool,
    /// 0.0 whenever `detected` is false
    pub confidence: f64,
}

impl DetectionOutcome {
    const MISS: DetectionOutcome = DetectionOutcome {
        detected: false,
        confidence: 0.0,
    };
}

/// Probabilistic stand-in for the image classifier.
///
/// Stateless: every random draw comes from the caller's RNG, so a seeded
/// RNG reproduces the same outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionModel {
    pub weather: WeatherTable,
    pub acceptance_threshold: f64,
    pub edge_falloff_m: f64,
}

impl Default for DetectionModel {
    fn default() -> Self {
        Self::from_config(&SurveyConfig::default())
    }
}

impl DetectionModel {
    pub fn from_config(config: &SurveyConfig) -> Self {
        Self {
            weather: config.weather.clone(),
            acceptance_threshold: config.acceptance_threshold,
            edge_falloff_m: config.edge_falloff_m,
        }
    }

    pub fn wind_modifier(conditions: &EnvironmentalConditions) -> f64 {
        (1.0 - conditions.wind_speed_kph / 50.0).max(0.0)
    }

    pub fn altitude_modifier(conditions: &EnvironmentalConditions) -> f64 {
        (1.0 - (conditions.drone_altitude_m - 5.0) / 50.0).max(0.5)
    }

    pub fn growth_modifier(growth_stage: u8) -> f64 {
        0.7 + growth_stage.min(4) as f64 * 0.075
    }

    /// Ranges from 0.3 on the boundary to 0.7 at `edge_falloff_m` and beyond
    pub fn edge_modifier(&self, edge_distance_m: f64) -> f64 {
        let normalized = if self.edge_falloff_m > 0.0 {
            (edge_distance_m / self.edge_falloff_m).clamp(0.0, 1.0)
        } else {
            1.0
        };
        0.3 + normalized * 0.4
    }

    /// Product of the specimen and environmental modifiers. Without a
    /// specimen the plant terms are neutral (detectability 1, growth 1).
    pub fn base_probability(
        &self,
        conditions: &EnvironmentalConditions,
        specimen: Option<&PlantSpecimen>,
    ) -> f64 {
        let environmental = self.weather.modifier(conditions.weather)
            * Self::wind_modifier(conditions)
            * Self::altitude_modifier(conditions);

        match specimen {
            Some(s) => {
                s.detectability.clamp(0.0, 1.0) * environmental * Self::growth_modifier(s.growth_stage)
            }
            None => environmental,
        }
    }

    /// Decide whether a weed is reported at `point`.
    ///
    /// One Bernoulli draw against `base * edge` (or `edge` alone when no
    /// specimen is present), then, if detected, one noise draw in
    /// [0.8, 1.2). Confidences below the acceptance threshold are dropped.
    pub fn detect<R: Rng>(
        &self,
        point: GeoPoint,
        edge_distance_m: f64,
        conditions: &EnvironmentalConditions,
        specimen: Option<&PlantSpecimen>,
        rng: &mut R,
    ) -> DetectionOutcome {
        let base = self.base_probability(conditions, specimen);
        let edge = self.edge_modifier(edge_distance_m);
        let probability = match specimen {
            Some(_) => base * edge,
            None => edge,
        };

        if rng.gen::<f64>() >= probability {
            return DetectionOutcome::MISS;
        }

        let noise = rng.gen_range(0.8..1.2);
        let confidence = (base * noise).min(1.0);
        if confidence < self.acceptance_threshold {
            tracing::trace!(
                "Discarding low-confidence hit at ({:.6}, {:.6}): {:.3}",
                point.lat,
                point.lng,
                confidence
            );
            return DetectionOutcome::MISS;
        }

        DetectionOutcome {
            detected: true,
            confidence,
        }
    }
}
