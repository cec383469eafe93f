use crate::config::PlanningConfig;
use crate::planning::estimate::estimate;
use crate::run_artifacts::{Detection, GeoPoint, PlanDocument, TreatmentMethod, TreatmentPlan, TreatmentStats};
use crate::store::DetectionRecord;
use crate::survey::types::{EnvironmentalConditions, SimulationState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const METADATA_FILE: &str = "metadata.json";
pub const PLAN_FILE: &str = "plan.json";
pub const DETECTIONS_FILE: &str = "detections.csv";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub polygon: Vec<GeoPoint>,
    pub conditions: EnvironmentalConditions,
    pub method: TreatmentMethod,
    pub seed: u64,
    pub path_len: usize,
    pub state: SimulationState,
    pub detection_count: usize,
    pub plan_id: Option<String>,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

impl RunMetadata {
    pub fn new(
        run_id: &str,
        polygon: Vec<GeoPoint>,
        conditions: EnvironmentalConditions,
        method: TreatmentMethod,
        seed: u64,
        path_len: usize,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            polygon,
            conditions,
            method,
            seed,
            path_len,
            state: SimulationState::Idle,
            detection_count: 0,
            plan_id: None,
            output_dir: PathBuf::new(),
        }
    }

    fn write(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(self.output_dir.join(METADATA_FILE), content)
            .with_context(|| format!("Failed to write metadata for run {}", self.run_id))
    }
}

/// Create `<output_root>/<run_id>` and write the initial metadata.json
pub fn create_run(output_root: &Path, mut metadata: RunMetadata) -> Result<RunMetadata> {
    let output_dir = output_root.join(&metadata.run_id);
    if output_dir.exists() {
        return Err(anyhow::anyhow!(
            "Output directory already exists for: {}",
            metadata.run_id
        ));
    }
    fs::create_dir_all(&output_dir)?;

    metadata.output_dir = output_dir;
    metadata.write()?;
    Ok(metadata)
}

/// Record the run outcome: detections.csv, plan.json (when a plan exists)
/// and the updated metadata.json
pub fn write_run_artifacts(
    metadata: &mut RunMetadata,
    state: SimulationState,
    detections: &[Detection],
    plan: Option<&TreatmentPlan>,
) -> Result<()> {
    write_detections_csv(&metadata.output_dir.join(DETECTIONS_FILE), detections)?;

    if let Some(plan) = plan {
        let document = PlanDocument {
            plan: plan.clone(),
            detections: detections.to_vec(),
        };
        export_plan(&metadata.output_dir.join(PLAN_FILE), &document)?;
    }

    metadata.state = state;
    metadata.detection_count = detections.len();
    metadata.plan_id = plan.map(|p| p.id.clone());
    metadata.write()?;

    tracing::info!(
        "Wrote artifacts for run {} to {:?}",
        metadata.run_id,
        metadata.output_dir
    );
    Ok(())
}

fn write_detections_csv(path: &Path, detections: &[Detection]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for detection in detections {
        writer.serialize(DetectionRecord::from(detection))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_plan(path: &Path, document: &PlanDocument) -> Result<()> {
    let content = serde_json::to_string_pretty(document)?;
    fs::write(path, content).with_context(|| format!("Failed to export plan to {:?}", path))
}

pub fn import_plan(path: &Path) -> Result<PlanDocument> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read plan {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid plan document {:?}", path))
}

/// Recompute stats from the embedded detections; matches the exported
/// stats exactly for an unmodified document
pub fn rederive_stats(document: &PlanDocument, config: &PlanningConfig) -> TreatmentStats {
    estimate(&document.detections, document.plan.method, config)
}

pub fn load_run_plan(metadata: &RunMetadata) -> Result<Option<PlanDocument>> {
    let path = metadata.output_dir.join(PLAN_FILE);
    if !path.exists() {
        return Ok(None);
    }
    import_plan(&path).map(Some)
}

pub fn list_runs(output_root: &Path) -> Result<Vec<(String, RunMetadata)>> {
    let mut outputs = Vec::new();

    if !output_root.exists() {
        return Ok(outputs);
    }

    for entry in fs::read_dir(output_root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let metadata_path = path.join(METADATA_FILE);
            if metadata_path.exists() {
                let content = fs::read_to_string(metadata_path)?;
                let mut metadata: RunMetadata = serde_json::from_str(&content)?;
                metadata.output_dir = path.clone();
                let name = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                outputs.push((name, metadata));
            }
        }
    }

    outputs.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
    Ok(outputs)
}

/// Every plan export below `root`, at any depth
pub fn list_plan_exports(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
                && e.file_name() != METADATA_FILE
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct VerifyReport {
    pub verified: Vec<PathBuf>,
    pub mismatched: Vec<PathBuf>,
    /// JSON files that are not plan documents
    pub skipped: Vec<PathBuf>,
}

/// Re-import every plan export below `root` and check that its stats can be
/// re-derived exactly
pub fn verify_plan_exports(root: &Path, config: &PlanningConfig) -> VerifyReport {
    let mut report = VerifyReport::default();
    for path in list_plan_exports(root) {
        let document = match import_plan(&path) {
            Ok(document) => document,
            Err(e) => {
                tracing::debug!("Skipping {:?}: {:#}", path, e);
                report.skipped.push(path);
                continue;
            }
        };
        if rederive_stats(&document, config) == document.plan.stats {
            report.verified.push(path);
        } else {
            tracing::warn!("Stats in {:?} do not match re-derived stats", path);
            report.mismatched.push(path);
        }
    }
    report
}
