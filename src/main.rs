use clap::Parser;
use smart_budget_etl::PipelineConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smart-budget-etl")]
#[command(about = "Export sales analytics views to CSV and compute dashboard KPIs")]
#[command(version)]
struct Args {
    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Directory for the CSV exports (overrides OUTPUT_DIR)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Real environment variables win over the file
    let env_loaded = match &args.env_file {
        Some(path) => dotenv::from_path(path).map_err(|e| format!("{}: {}", path.display(), e)),
        None => {
            dotenv::dotenv().ok();
            Ok(())
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = env_loaded {
        error!("Failed to load env file {}", e);
        return ExitCode::FAILURE;
    }

    let mut config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }

    match smart_budget_etl::run(&config).await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(view = %failure.view_name, "Exported empty {}: {}", failure.label, failure.error);
            }
            if let Some(warning) = &report.kpi_warning {
                warn!("KPI summary not written: {}", warning);
            }
            info!(run_id = %report.run_id, "Pipeline finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
