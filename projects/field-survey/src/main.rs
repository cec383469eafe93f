mod cli;
mod config;
mod planning;
mod run_artifacts;
mod run_context;
mod simulate;
mod store;
mod survey;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use config::SurveyConfig;
use run_context::verify_plan_exports;
use simulate::{load_scenario, run_scenario, ScenarioOverrides};
use std::sync::Arc;
use store::{HttpStore, InMemoryStore, SurveyStore};
use survey::orchestrator::SurveyEnvironment;
use web::server::run_server;

fn build_environment(args: &Args) -> Result<SurveyEnvironment> {
    let mut config = SurveyConfig::load(args.config.as_deref())?;
    if let Some(cell_size) = args.cell_size {
        config.cell_size_degrees = cell_size;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    let store: Arc<dyn SurveyStore> = match &args.backend_url {
        Some(url) => {
            tracing::info!("Forwarding detections and plans to {}", url);
            Arc::new(HttpStore::new(url, config.backend_timeout())?)
        }
        None => {
            tracing::info!("No backend configured, keeping detections in memory");
            Arc::new(InMemoryStore::default())
        }
    };

    Ok(SurveyEnvironment {
        config: Arc::new(config),
        store,
        output_root: args.output_root.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let env = build_environment(&args)?;

    match args.command {
        Command::Serve { host, port } => run_server(host, port, env).await?,
        Command::Simulate {
            scenario,
            seed,
            method,
            weather,
        } => {
            let overrides = ScenarioOverrides {
                seed,
                method,
                weather,
            };
            let request = load_scenario(&scenario, &overrides)?;
            let outcome = run_scenario(env, request).await?;
            match &outcome.plan {
                Some(plan) => println!("{}", serde_json::to_string_pretty(plan)?),
                None => println!("No detections, no treatment plan generated"),
            }
        }
        Command::Verify { root } => {
            let root = root.unwrap_or_else(|| env.output_root.clone());
            let report = verify_plan_exports(&root, &env.config.planning);
            for path in &report.skipped {
                println!("Skipped {:?}: not a plan export", path);
            }
            if !report.mismatched.is_empty() {
                anyhow::bail!("{} plan exports have stale stats", report.mismatched.len());
            }
            println!(
                "{} plan exports under {:?} re-derive cleanly",
                report.verified.len(),
                root
            );
        }
    }

    Ok(())
}
