use crate::survey::orchestrator::SurveyEnvironment;
use crate::web::api;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct AppState {
    pub env: SurveyEnvironment,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/coverage", post(api::coverage_handler))
        .route(
            "/api/surveys",
            get(api::list_surveys_handler).post(api::start_survey_handler),
        )
        .route("/api/surveys/:run_id", get(api::get_survey_handler))
        .route("/api/surveys/:run_id/events", get(api::survey_events_handler))
        .route("/api/surveys/:run_id/cancel", post(api::cancel_survey_handler))
        .route("/api/surveys/:run_id/plan", get(api::survey_plan_handler))
        .route("/api/surveys/:run_id/plan/:action", post(api::plan_status_handler))
        .route("/api/surveys/:run_id/zones", get(api::survey_zones_handler))
        .route("/api/detections/mock", post(api::mock_detections_handler))
        .route("/api/plans", post(api::generate_plan_handler))
        .route("/api/estimate", post(api::estimate_handler))
        .route("/api/runs", get(api::get_runs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(host: IpAddr, port: u16, env: SurveyEnvironment) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires a non-blocking socket
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let app = router(Arc::new(AppState { env }));

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Field survey server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}
