use crate::run_artifacts::TreatmentMethod;
use crate::survey::orchestrator::{start_survey, SurveyEnvironment, SurveyOutcome, SurveyRequest};
use crate::survey::types::Weather;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Command line overrides applied on top of a scenario file
#[derive(Debug, Clone, Default)]
pub struct ScenarioOverrides {
    pub seed: Option<u64>,
    pub method: Option<TreatmentMethod>,
    pub weather: Option<Weather>,
}

pub fn load_scenario(path: &Path, overrides: &ScenarioOverrides) -> Result<SurveyRequest> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read scenario {:?}", path))?;
    let mut request: SurveyRequest = serde_json::from_str(&content)
        .with_context(|| format!("Invalid scenario file {:?}", path))?;

    if overrides.seed.is_some() {
        request.seed = overrides.seed;
    }
    if overrides.method.is_some() {
        request.method = overrides.method;
    }
    if let Some(weather) = overrides.weather {
        request.conditions.weather = weather;
    }
    Ok(request)
}

/// Run one survey to completion in the foreground with a progress bar
pub async fn run_scenario(env: SurveyEnvironment, request: SurveyRequest) -> Result<SurveyOutcome> {
    let manager = start_survey(env, request)?;
    let progress = manager.progress.clone();

    let pb = ProgressBar::new(progress.total_cells as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} cells ({msg})")?
            .progress_chars("#>-"),
    );

    let outcome = loop {
        pb.set_position(progress.cursor.load(Ordering::Relaxed) as u64);
        pb.set_message(format!(
            "{} detections",
            progress.detections.load(Ordering::Relaxed)
        ));

        if let Some(outcome) = manager.outcome() {
            break outcome;
        }
        if let Some(error) = progress.error.read().ok().and_then(|e| e.clone()) {
            pb.abandon_with_message("failed");
            anyhow::bail!("Survey {} failed: {}", manager.run_id, error);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    pb.finish_with_message(format!("{} detections", outcome.detections.len()));
    tracing::info!(
        "Survey {} finished {:?} with {} detections",
        manager.run_id,
        outcome.state,
        outcome.detections.len()
    );
    Ok(outcome)
}
