// Scenario setup: where the simulated weeds are and how visible they are.

#[cfg(test)]
use crate::survey::coverage::CoverageCell;
use crate::survey::geometry::{bounds_of, offset_meters, point_in_polygon};
use crate::survey::types::{Detection, GeoPoint, PlantSpecimen};
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Base detectability of the only weed type the simulator models
const BASE_DETECTABILITY: f64 = 0.9;

/// Fraction of specimens scattered outside of clusters
const ISOLATED_FRACTION: f64 = 0.2;

/// The set of plants present in the field for one run. Immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FieldScenario {
    pub specimens: Vec<PlantSpecimen>,
}

impl FieldScenario {
    /// Random clustered field inside `polygon`: 3 to 6 clusters of 5-20 m
    /// radius holding the bulk of `count`, plus 20% isolated specimens.
    pub fn generate(polygon: &[GeoPoint], count: usize, seed: u64) -> Self {
        let Some(bounds) = bounds_of(polygon) else {
            return Self::default();
        };
        if polygon.len() < 3 || count == 0 {
            return Self::default();
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let random_point = |rng: &mut StdRng| {
            GeoPoint::new(
                rng.gen_range(bounds.south_west.lat..=bounds.north_east.lat),
                rng.gen_range(bounds.south_west.lng..=bounds.north_east.lng),
            )
        };

        let mut specimens = Vec::with_capacity(count + count / 5);
        let cluster_count = rng.gen_range(3..=6);
        for _ in 0..cluster_count {
            let center = random_point(&mut rng);
            let radius_m = rng.gen_range(5.0..20.0);
            let members = (count as f64 / cluster_count as f64 * rng.gen_range(0.7..1.3)) as usize;

            for _ in 0..members {
                let angle = rng.gen_range(0.0..std::f64::consts::TAU);
                // Squared draw biases members toward the cluster center
                let dist = rng.gen::<f64>() * rng.gen::<f64>() * radius_m;
                let position = offset_meters(center, angle.sin() * dist, angle.cos() * dist);
                specimens.push(random_specimen(position, &mut rng));
            }
        }

        let isolated = (count as f64 * ISOLATED_FRACTION) as usize;
        for _ in 0..isolated {
            let position = random_point(&mut rng);
            specimens.push(random_specimen(position, &mut rng));
        }

        specimens.retain(|s| point_in_polygon(s.position, polygon));
        tracing::debug!(
            "Generated scenario with {} specimens in {} clusters",
            specimens.len(),
            cluster_count
        );
        Self { specimens }
    }

    /// One identical specimen on every path point
    #[cfg(test)]
    pub fn uniform(path: &[CoverageCell], detectability: f64, growth_stage: u8) -> Self {
        Self {
            specimens: path
                .iter()
                .map(|cell| PlantSpecimen {
                    position: cell.point,
                    detectability,
                    growth_stage,
                })
                .collect(),
        }
    }

    /// Closest specimen within `tolerance_degrees` on both axes
    pub fn specimen_near(&self, point: GeoPoint, tolerance_degrees: f64) -> Option<&PlantSpecimen> {
        self.specimens
            .iter()
            .filter(|s| {
                (s.position.lat - point.lat).abs() <= tolerance_degrees
                    && (s.position.lng - point.lng).abs() <= tolerance_degrees
            })
            .min_by(|a, b| {
                squared_offset(a.position, point).total_cmp(&squared_offset(b.position, point))
            })
    }
}

fn squared_offset(a: GeoPoint, b: GeoPoint) -> f64 {
    (a.lat - b.lat).powi(2) + (a.lng - b.lng).powi(2)
}

fn random_specimen(position: GeoPoint, rng: &mut StdRng) -> PlantSpecimen {
    PlantSpecimen {
        position,
        detectability: (BASE_DETECTABILITY * rng.gen_range(0.9..1.1)).min(1.0),
        growth_stage: rng.gen_range(0..=4),
    }
}

/// Demo detections scattered ±0.005° around `base`, confidence 0.70-1.00,
/// timestamps within the last week.
pub fn mock_detections(base: GeoPoint, count: usize, seed: u64) -> Vec<Detection> {
    let mut rng = StdRng::seed_from_u64(seed);
    let now = Utc::now();

    (0..count)
        .map(|i| {
            let lat = base.lat + (rng.gen::<f64>() - 0.5) * 0.01;
            let lng = base.lng + (rng.gen::<f64>() - 0.5) * 0.01;
            let confidence = (70.0 + rng.gen::<f64>() * 30.0).round() / 100.0;
            let age_secs = rng.gen_range(0..7 * 24 * 3600);
            Detection {
                id: i as u64 + 1,
                position: GeoPoint::new(lat, lng),
                confidence,
                timestamp: now - Duration::seconds(age_secs),
            }
        })
        .collect()
}
