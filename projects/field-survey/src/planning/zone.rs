use crate::run_artifacts::{GeoPoint, TreatmentZone, ZoneGeometry};
use crate::survey::geometry::centroid;

/// Rough metres per degree used for drawing spot outlines
const OUTLINE_METERS_PER_DEGREE: f64 = 111_000.0;

const OUTLINE_VERTICES: usize = 8;

/// Display anchor for a zone. Empty hulls yield the `{0, 0}` sentinel.
pub fn zone_center(zone: &TreatmentZone) -> GeoPoint {
    match &zone.geometry {
        ZoneGeometry::Spot { center, .. } => *center,
        ZoneGeometry::Hull { points } => centroid(points),
        ZoneGeometry::Rectangle { bounds } => bounds.center(),
    }
}

/// Polygon outline for drawing; spots become an octagon
pub fn zone_outline(zone: &TreatmentZone) -> Vec<GeoPoint> {
    match &zone.geometry {
        ZoneGeometry::Hull { points } => points.iter().copied().filter(GeoPoint::is_valid).collect(),
        ZoneGeometry::Rectangle { bounds } => bounds.corners(),
        ZoneGeometry::Spot { center, radius_m } => {
            let lat_scale = OUTLINE_METERS_PER_DEGREE;
            let lng_scale = OUTLINE_METERS_PER_DEGREE * center.lat.to_radians().cos();
            (0..OUTLINE_VERTICES)
                .map(|i| {
                    let angle = i as f64 / OUTLINE_VERTICES as f64 * std::f64::consts::TAU;
                    GeoPoint::new(
                        center.lat + angle.sin() * radius_m / lat_scale,
                        center.lng + angle.cos() * radius_m / lng_scale,
                    )
                })
                .collect()
        }
    }
}

pub fn has_valid_geometry(zone: &TreatmentZone) -> bool {
    match &zone.geometry {
        ZoneGeometry::Hull { points } => points.len() >= 3 && points.iter().all(GeoPoint::is_valid),
        ZoneGeometry::Rectangle { bounds } => {
            bounds.south_west.is_valid() && bounds.north_east.is_valid() && bounds.is_ordered()
        }
        ZoneGeometry::Spot { center, radius_m } => center.is_valid() && *radius_m > 0.0,
    }
}
