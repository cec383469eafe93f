// Run artifact struct definitions
//
// This module contains the struct definitions for artifacts that are persisted
// as JSON files within a run's output directory or handed to the persistence
// backend.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A WGS84 location in decimal degrees
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Axis-aligned bounds, always ordered (south_west <= north_east on both axes)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }

    /// Corners in drawing order: SW, SE(lng), NE, NW(lng)
    pub fn corners(&self) -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(self.south_west.lat, self.south_west.lng),
            GeoPoint::new(self.south_west.lat, self.north_east.lng),
            GeoPoint::new(self.north_east.lat, self.north_east.lng),
            GeoPoint::new(self.north_east.lat, self.south_west.lng),
        ]
    }

    pub fn is_ordered(&self) -> bool {
        self.south_west.lat <= self.north_east.lat && self.south_west.lng <= self.north_east.lng
    }
}

/// One accepted observation of a weed
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: u64,
    pub position: GeoPoint,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentMethod {
    Precision,
    Zone,
    Broadcast,
}

impl std::fmt::Display for TreatmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TreatmentMethod::Precision => "precision",
            TreatmentMethod::Zone => "zone",
            TreatmentMethod::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// Geometry of a treatment zone. `Hull` is a buffered bounding box, not a
/// true convex hull.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ZoneGeometry {
    Spot { center: GeoPoint, radius_m: f64 },
    Rectangle { bounds: Bounds },
    Hull { points: Vec<GeoPoint> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreatmentZone {
    pub geometry: ZoneGeometry,
    #[serde(rename = "type")]
    pub kind: TreatmentMethod,
    pub weed_count: usize,
    pub herbicide: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStatus {
    Created,
    InProgress,
    Completed,
    Error,
}

/// Display-rounded cost/time figures for a detection set
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct TreatmentStats {
    pub total_weeds: usize,
    pub high_density_area_count: usize,
    pub chemical_liters_estimate: f64,
    pub time_minutes_estimate: f64,
    pub cost_estimate: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreatmentPlan {
    pub id: String,
    pub method: TreatmentMethod,
    pub zones: Vec<TreatmentZone>,
    pub created_at: DateTime<Utc>,
    pub total_weeds: usize,
    pub stats: TreatmentStats,
    pub status: PlanStatus,
}

/// Exported plan (plan.json). Detections are embedded so stats can be
/// re-derived offline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanDocument {
    pub plan: TreatmentPlan,
    pub detections: Vec<Detection>,
}
