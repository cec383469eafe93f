// Persistence backend port
//
// The engine only ever talks to the backend through `SurveyStore`, so the
// scheduler and planner stay testable without a network.

use crate::run_artifacts::{Detection, PlanStatus, TreatmentMethod, TreatmentZone};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// Wire record for one detection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Detection> for DetectionRecord {
    fn from(d: &Detection) -> Self {
        Self {
            id: d.id,
            latitude: d.position.lat,
            longitude: d.position.lng,
            confidence: d.confidence,
            timestamp: d.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanSubmission {
    pub method: TreatmentMethod,
    pub areas: Vec<TreatmentZone>,
    pub total_weeds: usize,
}

/// The backend's view of a saved plan; its id and status are authoritative
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredPlan {
    pub id: String,
    pub status: PlanStatus,
}

pub trait SurveyStore: Send + Sync {
    fn submit_detection(&self, record: DetectionRecord) -> BoxFuture<'_, Result<()>>;

    fn submit_plan(&self, submission: PlanSubmission) -> BoxFuture<'_, Result<StoredPlan>>;
}

/// JSON-over-HTTP backend
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    /// Every request is bounded by `timeout`; a backend that never answers
    /// counts as a failed submission
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_detection(&self, record: DetectionRecord) -> Result<()> {
        let url = format!("{}/detections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&record)
            .send()
            .await
            .context("Failed to send detection to backend")?;

        if !response.status().is_success() {
            anyhow::bail!("Backend rejected detection with status {}", response.status());
        }
        Ok(())
    }

    async fn post_plan(&self, submission: PlanSubmission) -> Result<StoredPlan> {
        let url = format!("{}/save_treatment_plan", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&submission)
            .send()
            .await
            .context("Failed to send treatment plan to backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Backend rejected treatment plan with status {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse stored treatment plan")
    }
}

impl SurveyStore for HttpStore {
    fn submit_detection(&self, record: DetectionRecord) -> BoxFuture<'_, Result<()>> {
        self.post_detection(record).boxed()
    }

    fn submit_plan(&self, submission: PlanSubmission) -> BoxFuture<'_, Result<StoredPlan>> {
        self.post_plan(submission).boxed()
    }
}

/// Process-local backend used when no URL is configured
#[derive(Debug, Default)]
pub struct InMemoryStore {
    detections: Mutex<Vec<DetectionRecord>>,
    plans: Mutex<Vec<PlanSubmission>>,
}

#[cfg(test)]
impl InMemoryStore {
    pub fn detections(&self) -> Vec<DetectionRecord> {
        self.detections.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn plans(&self) -> Vec<PlanSubmission> {
        self.plans.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl SurveyStore for InMemoryStore {
    fn submit_detection(&self, record: DetectionRecord) -> BoxFuture<'_, Result<()>> {
        async move {
            self.detections
                .lock()
                .map_err(|_| anyhow::anyhow!("detection store lock poisoned"))?
                .push(record);
            Ok(())
        }
        .boxed()
    }

    fn submit_plan(&self, submission: PlanSubmission) -> BoxFuture<'_, Result<StoredPlan>> {
        async move {
            let mut plans = self
                .plans
                .lock()
                .map_err(|_| anyhow::anyhow!("plan store lock poisoned"))?;
            plans.push(submission);
            Ok(StoredPlan {
                id: format!("plan-{}", plans.len()),
                status: PlanStatus::Created,
            })
        }
        .boxed()
    }
}
