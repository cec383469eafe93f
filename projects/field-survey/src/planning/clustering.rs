// Zone clustering: turns a batch of detections into treatment zones for
// each treatment method.

use crate::config::PlanningConfig;
use crate::run_artifacts::{Detection, GeoPoint, TreatmentMethod, TreatmentZone, ZoneGeometry};
use crate::survey::geometry::{bounds_of, expand_bounds, haversine_distance_m};

pub const HIGH_STRENGTH: &str = "High-Strength Selective Herbicide";
pub const MEDIUM_STRENGTH: &str = "Medium-Strength Selective Herbicide";
pub const STANDARD_SELECTIVE: &str = "Standard Selective Herbicide";
pub const MODERATE_STRENGTH: &str = "Moderate-Strength Herbicide";
pub const STANDARD_MIX: &str = "Standard Herbicide Mix";

/// Herbicide for a single weed, by detection confidence
pub fn recommended_herbicide(confidence: f64) -> &'static str {
    if confidence >= 0.90 {
        HIGH_STRENGTH
    } else if confidence >= 0.75 {
        MEDIUM_STRENGTH
    } else {
        STANDARD_SELECTIVE
    }
}

/// Greedy single-pass proximity clustering.
///
/// Each unclustered detection seeds a cluster and claims every later
/// unclustered detection strictly closer than `threshold_m` to the seed.
/// Membership is not transitive. Returns indices into `detections`.
pub fn cluster_indices(detections: &[Detection], threshold_m: f64) -> Vec<Vec<usize>> {
    let mut clustered = vec![false; detections.len()];
    let mut clusters = Vec::new();

    for i in 0..detections.len() {
        if clustered[i] {
            continue;
        }
        clustered[i] = true;
        let mut members = vec![i];

        for j in 0..detections.len() {
            if clustered[j] {
                continue;
            }
            let distance = haversine_distance_m(detections[i].position, detections[j].position);
            if distance < threshold_m {
                clustered[j] = true;
                members.push(j);
            }
        }
        clusters.push(members);
    }

    clusters
}

/// One spot per detection
pub fn precision_zones(detections: &[Detection], config: &PlanningConfig) -> Vec<TreatmentZone> {
    detections
        .iter()
        .map(|d| TreatmentZone {
            geometry: ZoneGeometry::Spot {
                center: d.position,
                radius_m: config.precision_spot_radius_m,
            },
            kind: TreatmentMethod::Precision,
            weed_count: 1,
            herbicide: recommended_herbicide(d.confidence).to_string(),
        })
        .collect()
}

/// Proximity clusters shaped by size: hull for 3+, rectangle for 2, spot for 1
pub fn proximity_zones(detections: &[Detection], config: &PlanningConfig) -> Vec<TreatmentZone> {
    cluster_indices(detections, config.proximity_threshold_m)
        .into_iter()
        .filter_map(|members| {
            let points: Vec<GeoPoint> = members.iter().map(|&i| detections[i].position).collect();

            if let [only] = members.as_slice() {
                let seed = &detections[*only];
                return Some(TreatmentZone {
                    geometry: ZoneGeometry::Spot {
                        center: seed.position,
                        radius_m: config.singleton_spot_radius_m,
                    },
                    kind: TreatmentMethod::Zone,
                    weed_count: 1,
                    herbicide: recommended_herbicide(seed.confidence).to_string(),
                });
            }

            let bounds = expand_bounds(&bounds_of(&points)?, config.zone_buffer_degrees);
            let geometry = if points.len() >= 3 {
                // Buffered bounding box standing in for the convex hull
                ZoneGeometry::Hull {
                    points: bounds.corners(),
                }
            } else {
                ZoneGeometry::Rectangle { bounds }
            };

            Some(TreatmentZone {
                geometry,
                kind: TreatmentMethod::Zone,
                weed_count: points.len(),
                herbicide: MODERATE_STRENGTH.to_string(),
            })
        })
        .collect()
}

/// Single rectangle over every detection, or `None` for an empty batch
pub fn broadcast_zone(detections: &[Detection]) -> Option<TreatmentZone> {
    let points: Vec<GeoPoint> = detections.iter().map(|d| d.position).collect();
    let bounds = bounds_of(&points)?;
    Some(TreatmentZone {
        geometry: ZoneGeometry::Rectangle { bounds },
        kind: TreatmentMethod::Broadcast,
        weed_count: detections.len(),
        herbicide: STANDARD_MIX.to_string(),
    })
}

pub fn zones_for(
    method: TreatmentMethod,
    detections: &[Detection],
    config: &PlanningConfig,
) -> Vec<TreatmentZone> {
    match method {
        TreatmentMethod::Precision => precision_zones(detections, config),
        TreatmentMethod::Zone => proximity_zones(detections, config),
        TreatmentMethod::Broadcast => broadcast_zone(detections).into_iter().collect(),
    }
}
