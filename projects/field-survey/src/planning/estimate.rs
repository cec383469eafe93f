// Cost/time estimator
//
// Pure function of (detections, method, config). Rounding is applied once,
// to the final figures only.

use crate::config::PlanningConfig;
use crate::planning::clustering::proximity_zones;
use crate::run_artifacts::{Detection, GeoPoint, TreatmentMethod, TreatmentStats};
use crate::survey::geometry::{bounds_area_m2, bounds_of};

/// Unrounded estimator output
#[derive(Debug, Clone, Copy, PartialEq)]
struct RawEstimate {
    chemical_liters: f64,
    minutes: f64,
    cost: f64,
}

pub fn estimate(
    detections: &[Detection],
    method: TreatmentMethod,
    config: &PlanningConfig,
) -> TreatmentStats {
    if detections.is_empty() {
        return TreatmentStats::default();
    }

    // Density always comes from proximity clustering, whatever the method
    let zones = proximity_zones(detections, config);
    let high_density_area_count = zones
        .iter()
        .filter(|z| z.weed_count >= config.high_density_threshold)
        .count();

    let weeds = detections.len() as f64;
    let rates = config.cost.rates(method);
    let (chemical_liters, minutes) = match method {
        TreatmentMethod::Precision => (weeds * rates.chemical_rate, weeds * rates.minutes_rate),
        TreatmentMethod::Zone => (
            weeds * rates.chemical_rate,
            zones.len() as f64 * rates.minutes_rate,
        ),
        TreatmentMethod::Broadcast => {
            let area = detection_area_m2(detections);
            // sqrt(area) is a travel-distance proxy
            (area * rates.chemical_rate, area.sqrt() * rates.minutes_rate)
        }
    };
    let raw = RawEstimate {
        chemical_liters,
        minutes,
        cost: rates.base_cost
            + chemical_liters * rates.chemical_price
            + minutes / 60.0 * rates.labor_rate,
    };

    TreatmentStats {
        total_weeds: detections.len(),
        high_density_area_count,
        chemical_liters_estimate: (raw.chemical_liters * 10.0).round() / 10.0,
        time_minutes_estimate: raw.minutes.round(),
        cost_estimate: raw.cost.round(),
    }
}

fn detection_area_m2(detections: &[Detection]) -> f64 {
    let points: Vec<GeoPoint> = detections.iter().map(|d| d.position).collect();
    bounds_of(&points).map(|b| bounds_area_m2(&b)).unwrap_or(0.0)
}
