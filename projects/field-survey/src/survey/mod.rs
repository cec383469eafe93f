// Survey simulation: geometry, coverage path, detection model and flight scheduler

pub mod coverage;
pub mod detection;
pub mod geometry;
pub mod orchestrator;
pub mod scenario;
pub mod scheduler;
pub mod types;
