use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::init::ChatConfig;
use crate::loader::Table;

// ============================================================================
// Wire Types
// ============================================================================

/// Generation knobs forwarded to the chart service. The wire format belongs to
/// the service; these are serde mirrors only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub n: u32,
    pub temperature: f32,
    pub use_cache: bool,
    pub model: String,
}

impl GenerationConfig {
    /// Single candidate, moderate randomness, caching disabled.
    pub fn fixed(model: &str) -> Self {
        Self {
            n: 1,
            temperature: 0.5,
            use_cache: false,
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub dataset_name: String,
    pub columns: Vec<FieldSpec>,
    pub row_count: usize,
    pub sample_rows: Vec<Vec<String>>,
    pub config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: String,
}

const SAMPLE_ROW_LIMIT: usize = 10;

impl SummarizeRequest {
    pub fn from_table(name: &str, table: &Table, config: GenerationConfig) -> Self {
        Self {
            dataset_name: name.to_string(),
            columns: table
                .columns
                .iter()
                .map(|c| FieldSpec {
                    name: c.name.clone(),
                    kind: format!("{:?}", c.kind).to_lowercase(),
                })
                .collect(),
            row_count: table.row_count(),
            sample_rows: table.sample(SAMPLE_ROW_LIMIT).to_vec(),
            config,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualizeRequest {
    pub question: String,
    pub summary: Value,
    pub config: GenerationConfig,
}

/// One proposed visualization: generated plotting code plus its rendering.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartCandidate {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    pub image_base64: String,
    #[serde(default)]
    pub image_format: Option<String>,
}

impl ChartCandidate {
    pub fn code_extension(&self) -> &str {
        match self.language.as_deref() {
            Some("rust") => "rs",
            Some("r") => "r",
            _ => "py",
        }
    }

    pub fn image_extension(&self) -> &str {
        self.image_format.as_deref().unwrap_or("png")
    }
}

#[derive(Debug, Deserialize)]
struct VisualizeResponse {
    #[serde(default)]
    charts: Vec<ChartCandidate>,
}

// ============================================================================
// Service Trait
// ============================================================================

/// The remote summarization/visualization service. Split behind a trait so
/// orchestration tests can run against a scripted stand-in.
#[async_trait]
pub trait ChartService: Send + Sync {
    /// Describes the table's schema and statistics. The payload shape is owned
    /// by the service; it is relayed into `visualize` untouched.
    async fn summarize(&self, request: SummarizeRequest) -> Result<Value>;

    /// Produces zero or more chart candidates addressing the question.
    async fn visualize(&self, request: VisualizeRequest) -> Result<Vec<ChartCandidate>>;
}

// ============================================================================
// HTTP Implementation
// ============================================================================

pub struct HttpChartService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpChartService {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .header("api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::analysis_service(format!("chart service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::analysis_service(format!(
                "chart service returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::analysis_service(format!("chart service sent bad JSON: {}", e)))
    }
}

#[async_trait]
impl ChartService for HttpChartService {
    async fn summarize(&self, request: SummarizeRequest) -> Result<Value> {
        self.post("/summarize", &request).await
    }

    async fn visualize(&self, request: VisualizeRequest) -> Result<Vec<ChartCandidate>> {
        let value = self.post("/visualize", &request).await?;
        let parsed: VisualizeResponse = serde_json::from_value(value)
            .map_err(|e| AppError::analysis_service(format!("unexpected visualize shape: {}", e)))?;
        Ok(parsed.charts)
    }
}

// ============================================================================
// Tests
// ============================================================================
