use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::chart::{ChartService, GenerationConfig, SummarizeRequest, VisualizeRequest};
use crate::error::{AppError, Result};
use crate::loader::load_table;

// ============================================================================
// Outcome
// ============================================================================

/// Either a rendered chart on disk or a message telling the caller which
/// columns exist so the question can be rephrased.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Chart {
        image_path: PathBuf,
        code_path: PathBuf,
    },
    NoChart(String),
}

impl AnalysisOutcome {
    /// The tool-facing rendering: an image path or the fallback message.
    pub fn into_message(self) -> String {
        match self {
            Self::Chart { image_path, .. } => image_path.display().to_string(),
            Self::NoChart(message) => message,
        }
    }
}

pub const NO_CHART_PREFIX: &str =
    "No chart could be generated for this question. Available columns: ";

// ============================================================================
// Analysis Generator
// ============================================================================

pub struct AnalysisGenerator {
    chart: Arc<dyn ChartService>,
}

impl AnalysisGenerator {
    pub fn new(chart: Arc<dyn ChartService>) -> Self {
        Self { chart }
    }

    /// Loads the dataset, asks the chart service for a summary and chart
    /// candidates, and persists the first candidate. Writes exactly two files
    /// on success; whatever was written before a failure is left in place.
    pub async fn generate(
        &self,
        question: &str,
        model: &str,
        data_path: &Path,
        output_dir: &Path,
    ) -> Result<AnalysisOutcome> {
        if question.trim().is_empty() {
            return Err(AppError::bad_request("question must not be empty"));
        }

        let table = load_table(data_path)?;
        log::info!(
            "📊 Loaded {} ({} rows, {} columns)",
            data_path.display(),
            table.row_count(),
            table.columns.len()
        );

        let dataset_name = data_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();

        let config = GenerationConfig::fixed(model);
        let summary = self
            .chart
            .summarize(SummarizeRequest::from_table(
                &dataset_name,
                &table,
                config.clone(),
            ))
            .await?;

        let candidates = self
            .chart
            .visualize(VisualizeRequest {
                question: question.to_string(),
                summary,
                config,
            })
            .await?;

        let Some(candidate) = candidates.first() else {
            let names = table.column_names().join(", ");
            log::warn!("no chart candidates for question: {}", question);
            return Ok(AnalysisOutcome::NoChart(format!(
                "{}{}",
                NO_CHART_PREFIX, names
            )));
        };
        if candidates.len() > 1 {
            // Only the first candidate is kept
            log::debug!("discarding {} extra chart candidates", candidates.len() - 1);
        }

        std::fs::create_dir_all(output_dir).map_err(|e| {
            AppError::persistence(format!("cannot create {}: {}", output_dir.display(), e))
        })?;

        let timestamp = chrono::Utc::now().timestamp();
        let code_path = output_dir.join(format!("code_{}.{}", timestamp, candidate.code_extension()));
        let image_path =
            output_dir.join(format!("chart_{}.{}", timestamp, candidate.image_extension()));

        std::fs::write(&code_path, &candidate.code).map_err(|e| {
            AppError::persistence(format!("cannot write {}: {}", code_path.display(), e))
        })?;

        let image_bytes = BASE64.decode(&candidate.image_base64).map_err(|e| {
            AppError::analysis_service(format!("chart image is not valid base64: {}", e))
        })?;
        std::fs::write(&image_path, image_bytes).map_err(|e| {
            AppError::persistence(format!("cannot write {}: {}", image_path.display(), e))
        })?;

        log::info!("🖼️ Chart saved to {}", image_path.display());
        Ok(AnalysisOutcome::Chart {
            image_path,
            code_path,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
