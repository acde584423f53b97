// Module declarations
pub mod config;
pub mod db;
pub mod export;
pub mod kpi;
pub mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use kpi::{compute_kpis, KpiError, KpiInputs, KpiRecord};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, ViewDescriptor, DEFAULT_VIEWS};

/// Run the pipeline once over the default views with the default drivers
pub async fn run(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    Pipeline::new(config).await.run().await
}
