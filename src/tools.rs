use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::analysis::AnalysisGenerator;
use crate::error::AppError;
use crate::vision::VisualInterpreter;

// ============================================================================
// Tool Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments for {tool}: {source}")]
    InvalidArgs {
        tool: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::App(inner) => inner,
            other => AppError::bad_request(other.to_string()),
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// What the hosted agent sees: a name, a description, and a JSON schema for
/// the arguments it may pass.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A capability the hosted runtime may invoke during a run. The runtime
/// decides when and with what arguments; this side only executes.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, args: Value) -> Result<String, ToolError>;
}

fn parameters_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|source| ToolError::InvalidArgs {
        tool: tool.to_string(),
        source,
    })
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Mapping from tool name to implementation, handed to the orchestrator at
/// construction. The hosted run dispatches through this table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl AgentTool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        log::info!("🔧 Invoking tool '{}'", name);
        tool.invoke(args).await
    }
}

// ============================================================================
// Analyze Data Tool
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeDataArgs {
    /// The natural-language question to chart.
    pub question: String,
    /// Path to the tabular input file (csv or xlsx).
    pub data_path: String,
    /// Directory the chart artifacts are written to.
    pub output_dir: String,
    /// Optional model override; the deployment default is used when absent.
    #[serde(default)]
    pub model: Option<String>,
}

pub struct AnalyzeDataTool {
    generator: Arc<AnalysisGenerator>,
    default_model: String,
}

impl AnalyzeDataTool {
    pub const NAME: &'static str = "generate_analysis";

    pub fn new(generator: Arc<AnalysisGenerator>, default_model: String) -> Self {
        Self {
            generator,
            default_model,
        }
    }
}

#[async_trait]
impl AgentTool for AnalyzeDataTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Generates a chart answering a question about a tabular dataset and \
                          returns the path of the rendered image, or a message listing the \
                          available columns when no chart can be produced."
                .to_string(),
            parameters: parameters_schema::<AnalyzeDataArgs>(),
        }
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let args: AnalyzeDataArgs = parse_args(Self::NAME, args)?;
        let model = args.model.as_deref().unwrap_or(&self.default_model);
        let outcome = self
            .generator
            .generate(
                &args.question,
                model,
                Path::new(&args.data_path),
                Path::new(&args.output_dir),
            )
            .await?;
        Ok(outcome.into_message())
    }
}

// ============================================================================
// Interpret Chart Tool
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InterpretChartArgs {
    /// The original question the chart was produced for.
    pub question: String,
    /// Path to a previously rendered chart image.
    pub image_path: String,
    /// Optional vision model override.
    #[serde(default)]
    pub model: Option<String>,
}

pub struct InterpretChartTool {
    interpreter: Arc<VisualInterpreter>,
    default_model: String,
}

impl InterpretChartTool {
    pub const NAME: &'static str = "visual_analysis";

    pub fn new(interpreter: Arc<VisualInterpreter>, default_model: String) -> Self {
        Self {
            interpreter,
            default_model,
        }
    }
}

#[async_trait]
impl AgentTool for InterpretChartTool {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Sends a rendered chart image to a vision model and returns its \
                          narrative interpretation as the raw completion payload."
                .to_string(),
            parameters: parameters_schema::<InterpretChartArgs>(),
        }
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let args: InterpretChartArgs = parse_args(Self::NAME, args)?;
        let model = args.model.as_deref().unwrap_or(&self.default_model);
        let payload = self
            .interpreter
            .interpret(&args.question, Path::new(&args.image_path), model)
            .await?;
        serde_json::to_string(&payload)
            .map_err(|e| ToolError::App(AppError::internal(format!("payload serialization: {}", e))))
    }
}

// ============================================================================
// Tests
// ============================================================================
