use std::sync::Arc;

use crate::analysis::AnalysisGenerator;
use crate::chart::HttpChartService;
use crate::error::AppError;
use crate::orchestrator::Orchestrator;
use crate::runtime::HttpAgentService;
use crate::tools::{AnalyzeDataTool, InterpretChartTool, ToolRegistry};
use crate::vision::VisualInterpreter;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub chat: ChatConfig,
    pub agent_project: AgentProjectConfig,
    pub output_dir: String,
    pub host: String,
    pub port: u16,
}

/// Chat/completion endpoint shared by the chart service and the vision model.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

/// Hosted agent project, configured as a `endpoint;api-key` connection string.
#[derive(Debug, Clone)]
pub struct AgentProjectConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl AgentProjectConfig {
    pub fn parse(connection: &str) -> Result<Self, AppError> {
        let (endpoint, api_key) = connection.split_once(';').ok_or_else(|| {
            AppError::config("AGENT_PROJECT_CONNECTION must be of the form '<endpoint>;<api-key>'")
        })?;
        if endpoint.is_empty() || api_key.is_empty() {
            return Err(AppError::config(
                "AGENT_PROJECT_CONNECTION has an empty endpoint or api-key part",
            ));
        }
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            chat: ChatConfig {
                endpoint: required_var("CHAT_API_ENDPOINT")?
                    .trim_end_matches('/')
                    .to_string(),
                api_key: required_var("CHAT_API_KEY")?,
                model: required_var("CHAT_MODEL")?,
            },
            agent_project: AgentProjectConfig::parse(&required_var("AGENT_PROJECT_CONNECTION")?)?,
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "./output".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| AppError::config(format!("PORT is not a number: {}", e)))?,
        })
    }
}

fn required_var(name: &str) -> Result<String, AppError> {
    std::env::var(name).map_err(|_| AppError::config(format!("{} is not set", name)))
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator<HttpAgentService>,
}

pub async fn app_init() -> Result<(Config, Arc<AppState>), AppError> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");

    let chart_service = Arc::new(HttpChartService::new(&config.chat));
    let generator = Arc::new(AnalysisGenerator::new(chart_service));
    let interpreter = Arc::new(VisualInterpreter::new(&config.chat));
    log::info!("✅ Chart and vision clients initialized");

    let mut registry = ToolRegistry::new();
    registry.register(AnalyzeDataTool::new(generator, config.chat.model.clone()));
    registry.register(InterpretChartTool::new(
        interpreter,
        config.chat.model.clone(),
    ));
    log::info!("✅ Tool registry built: {}", registry.names().join(", "));

    let service = HttpAgentService::new(&config.agent_project);
    let orchestrator = Orchestrator::new(service, registry, config.chat.model.clone());

    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator,
    });
    Ok((config, state))
}

// ============================================================================
// Tests
// ============================================================================
