// Plan generator and plan status workflow

use crate::config::PlanningConfig;
use crate::planning::clustering::zones_for;
use crate::planning::estimate::estimate;
use crate::planning::zone::has_valid_geometry;
use crate::run_artifacts::{
    Detection, PlanStatus, TreatmentMethod, TreatmentPlan, TreatmentZone,
};
use crate::store::{PlanSubmission, StoredPlan};
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("treatment plan has no zones")]
    NoZones,
    #[error("zone {0} has invalid geometry")]
    InvalidZone(usize),
    #[error("cannot move plan from {from:?} to {to:?}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },
}

/// Generator output. `plan` is `None` when there were no detections.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PlanOutput {
    pub zones: Vec<TreatmentZone>,
    pub plan: Option<TreatmentPlan>,
}

pub fn generate_plan(
    detections: &[Detection],
    method: TreatmentMethod,
    config: &PlanningConfig,
) -> PlanOutput {
    if detections.is_empty() {
        return PlanOutput {
            zones: Vec::new(),
            plan: None,
        };
    }

    let zones = zones_for(method, detections, config);
    let created_at = Utc::now();
    let plan = TreatmentPlan {
        id: format!("local-{}", created_at.timestamp_millis()),
        method,
        zones: zones.clone(),
        created_at,
        total_weeds: detections.len(),
        stats: estimate(detections, method, config),
        status: PlanStatus::Created,
    };
    tracing::debug!(
        "Generated {} plan with {} zones for {} detections",
        method,
        zones.len(),
        detections.len()
    );

    PlanOutput {
        zones,
        plan: Some(plan),
    }
}

/// Checks that a plan has at least one zone and every zone is drawable
pub fn validate_plan(plan: &TreatmentPlan) -> Result<(), PlanError> {
    if plan.zones.is_empty() {
        return Err(PlanError::NoZones);
    }
    match plan.zones.iter().position(|z| !has_valid_geometry(z)) {
        Some(index) => Err(PlanError::InvalidZone(index)),
        None => Ok(()),
    }
}

impl TreatmentPlan {
    pub fn to_submission(&self) -> PlanSubmission {
        PlanSubmission {
            method: self.method,
            areas: self.zones.clone(),
            total_weeds: self.total_weeds,
        }
    }

    /// The backend's id and status replace the local ones
    pub fn adopt(&mut self, stored: StoredPlan) {
        self.id = stored.id;
        self.status = stored.status;
    }

    pub fn start(&mut self) -> Result<(), PlanError> {
        self.transition(PlanStatus::Created, PlanStatus::InProgress)
    }

    pub fn complete(&mut self) -> Result<(), PlanError> {
        self.transition(PlanStatus::InProgress, PlanStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<(), PlanError> {
        if self.status == PlanStatus::Completed {
            return Err(PlanError::InvalidTransition {
                from: self.status,
                to: PlanStatus::Error,
            });
        }
        self.status = PlanStatus::Error;
        Ok(())
    }

    fn transition(&mut self, from: PlanStatus, to: PlanStatus) -> Result<(), PlanError> {
        if self.status != from {
            return Err(PlanError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_artifacts::{GeoPoint, ZoneGeometry};
    use crate::survey::geometry::offset_meters;

    fn detections(n: u64) -> Vec<Detection> {
        let origin = GeoPoint::new(-0.68885, 34.78321);
        (0..n)
            .map(|i| Detection {
                id: i + 1,
                position: offset_meters(origin, (i % 4) as f64 * 3.0, (i / 4) as f64 * 30.0),
                confidence: 0.7 + (i % 3) as f64 * 0.1,
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_empty_batch_yields_no_plan() {
        let output = generate_plan(&[], TreatmentMethod::Zone, &PlanningConfig::default());
        assert!(output.zones.is_empty());
        assert!(output.plan.is_none());
    }

    #[test]
    fn test_total_weeds_equals_detection_count() {
        let batch = detections(12);
        for method in [
            TreatmentMethod::Precision,
            TreatmentMethod::Zone,
            TreatmentMethod::Broadcast,
        ] {
            let output = generate_plan(&batch, method, &PlanningConfig::default());
            let plan = output.plan.unwrap();
            assert_eq!(plan.total_weeds, 12);
            assert_eq!(plan.stats.total_weeds, 12);
            assert_eq!(plan.zones, output.zones);
            assert_eq!(plan.status, PlanStatus::Created);
            assert!(validate_plan(&plan).is_ok());
        }

        let zone_plan = generate_plan(&batch, TreatmentMethod::Zone, &PlanningConfig::default())
            .plan
            .unwrap();
        // Columns 30 m apart, four weeds per column
        assert_eq!(zone_plan.zones.len(), 3);
    }

    #[test]
    fn test_validation_rejects_bad_zones() {
        let mut plan = generate_plan(&detections(2), TreatmentMethod::Precision, &PlanningConfig::default())
            .plan
            .unwrap();
        plan.zones[1].geometry = ZoneGeometry::Hull { points: Vec::new() };
        assert_eq!(validate_plan(&plan), Err(PlanError::InvalidZone(1)));

        plan.zones.clear();
        assert_eq!(validate_plan(&plan), Err(PlanError::NoZones));
    }

    #[test]
    fn test_status_workflow() {
        let mut plan = generate_plan(&detections(3), TreatmentMethod::Zone, &PlanningConfig::default())
            .plan
            .unwrap();

        assert!(plan.complete().is_err());
        plan.start().unwrap();
        assert_eq!(plan.status, PlanStatus::InProgress);
        assert!(plan.start().is_err());
        plan.complete().unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(
            plan.fail(),
            Err(PlanError::InvalidTransition {
                from: PlanStatus::Completed,
                to: PlanStatus::Error
            })
        );
    }

    #[test]
    fn test_adopt_backend_identity() {
        let mut plan = generate_plan(&detections(3), TreatmentMethod::Zone, &PlanningConfig::default())
            .plan
            .unwrap();
        let submission = plan.to_submission();
        assert_eq!(submission.total_weeds, 3);
        assert_eq!(submission.areas, plan.zones);

        plan.adopt(StoredPlan {
            id: "42".to_string(),
            status: PlanStatus::InProgress,
        });
        assert_eq!(plan.id, "42");
        assert_eq!(plan.status, PlanStatus::InProgress);
    }
}
