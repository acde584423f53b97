// Pipeline Orchestrator
// connect -> load every view -> export each as CSV -> KPIs -> KPI CSV

use crate::config::PipelineConfig;
use crate::db::{DatabaseError, DriverRegistry, LoadStrategy, QueryResult};
use crate::export::{CsvExporter, ExportError};
use crate::kpi::{compute_kpis, KpiInputs, KpiRecord};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub const SALES_EXPORT_LABEL: &str = "sales_export";
pub const SALESPERSON_LABEL: &str = "sales_by_salesperson";
pub const MONTHLY_LABEL: &str = "monthly_sales";
pub const KPI_LABEL: &str = "kpi_summary";

/// A source view and the label its CSV is written under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDescriptor {
    pub view_name: &'static str,
    pub label: &'static str,
}

impl ViewDescriptor {
    pub const fn new(view_name: &'static str, label: &'static str) -> Self {
        Self { view_name, label }
    }
}

pub const DEFAULT_VIEWS: [ViewDescriptor; 7] = [
    ViewDescriptor::new("vw_sales_export", SALES_EXPORT_LABEL),
    ViewDescriptor::new("summary_sales_country", "sales_by_country"),
    ViewDescriptor::new("summary_sales_person", SALESPERSON_LABEL),
    ViewDescriptor::new("summary_product_sales", "sales_by_product"),
    ViewDescriptor::new("summary_deal_size", "deal_size"),
    ViewDescriptor::new("vw_monthly_sales", MONTHLY_LABEL),
    ViewDescriptor::new("vw_null_summary", "data_quality"),
];

#[derive(Debug, Clone)]
pub struct LoadedView {
    pub view_name: String,
    pub label: String,
    pub row_count: usize,
    pub strategy: LoadStrategy,
}

/// A view that could not be loaded; it was exported as an empty file
#[derive(Debug, Clone)]
pub struct ViewFailure {
    pub view_name: String,
    pub label: String,
    pub error: String,
}

/// Outcome of one run, including the problems that did not abort it
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub loaded: Vec<LoadedView>,
    pub failures: Vec<ViewFailure>,
    pub exports: Vec<PathBuf>,
    pub kpi: Option<KpiRecord>,
    pub kpi_export: Option<PathBuf>,
    pub kpi_warning: Option<String>,
}

impl PipelineReport {
    pub fn failed_views(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.view_name.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    registry: DriverRegistry,
    exporter: CsvExporter,
    views: Vec<ViewDescriptor>,
}

impl<'a> Pipeline<'a> {
    pub async fn new(config: &'a PipelineConfig) -> Self {
        Self::with_registry(config, DriverRegistry::with_default_drivers().await)
    }

    pub fn with_registry(config: &'a PipelineConfig, registry: DriverRegistry) -> Self {
        Self {
            config,
            registry,
            exporter: CsvExporter::new(),
            views: DEFAULT_VIEWS.to_vec(),
        }
    }

    pub fn with_views(mut self, views: Vec<ViewDescriptor>) -> Self {
        self.views = views;
        self
    }

    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: String) -> Result<PipelineReport, PipelineError> {
        let output_dir = &self.config.output_dir;
        let mut report = PipelineReport {
            run_id,
            output_dir: output_dir.clone(),
            loaded: Vec::new(),
            failures: Vec::new(),
            exports: Vec::new(),
            kpi: None,
            kpi_export: None,
            kpi_warning: None,
        };

        let connection = self.registry.connect(&self.config.database).await?;
        let loader = connection.loader();

        let mut results = Vec::with_capacity(self.views.len());
        for view in &self.views {
            let result = match loader.load(view.view_name).await {
                Ok(result) => {
                    report.loaded.push(LoadedView {
                        view_name: view.view_name.to_string(),
                        label: view.label.to_string(),
                        row_count: result.row_count,
                        strategy: result.strategy,
                    });
                    result
                }
                Err(e) => {
                    warn!(view = view.view_name, error = %e, "Skipping view");
                    report.failures.push(ViewFailure {
                        view_name: view.view_name.to_string(),
                        label: view.label.to_string(),
                        error: e.to_string(),
                    });
                    QueryResult::empty(view.view_name)
                }
            };
            results.push((view.label, result));
        }

        for (label, result) in &results {
            let path = self.exporter.export_labeled(result, label, output_dir)?;
            report.exports.push(path);
        }

        let empty = QueryResult::empty("");
        let inputs = KpiInputs {
            sales: result_for(&results, SALES_EXPORT_LABEL, &empty),
            ranking: result_for(&results, SALESPERSON_LABEL, &empty),
            monthly: result_for(&results, MONTHLY_LABEL, &empty),
        };

        match compute_kpis(&inputs) {
            Ok(Some(record)) => {
                info!(
                    total_revenue = record.total_revenue,
                    total_orders = record.total_orders,
                    monthly_growth = record.monthly_growth_pct,
                    "KPIs computed"
                );
                let path = self.exporter.export_record(&record, KPI_LABEL, output_dir)?;
                report.kpi_export = Some(path);
                report.kpi = Some(record);
            }
            Ok(None) => warn!("Sales export is empty, skipping KPI export"),
            Err(e) => {
                warn!(error = %e, "KPI computation failed, skipping KPI export");
                report.kpi_warning = Some(e.to_string());
            }
        }

        let absolute = std::fs::canonicalize(output_dir).unwrap_or_else(|_| output_dir.clone());
        info!(
            output_dir = %absolute.display(),
            exported = report.exports.len() + usize::from(report.kpi_export.is_some()),
            failed = report.failures.len(),
            "All exports saved"
        );
        report.output_dir = absolute;

        Ok(report)
    }
}

/// The result loaded under `label`, or `empty` when no view carries it
fn result_for<'r>(
    results: &'r [(&'static str, QueryResult)],
    label: &str,
    empty: &'r QueryResult,
) -> &'r QueryResult {
    results
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, result)| result)
        .unwrap_or(empty)
}
