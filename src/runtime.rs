use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::error::{AppError, Result};
use crate::init::AgentProjectConfig;
use crate::tools::{ToolDefinition, ToolRegistry};

// ============================================================================
// Service Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<FunctionTool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolDefinition,
}

impl FunctionTool {
    pub fn from_definitions(definitions: Vec<ToolDefinition>) -> Vec<Self> {
        definitions
            .into_iter()
            .map(|function| Self {
                tool_type: "function".to_string(),
                function,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Expired)
    }
}

/// Terminal state of one hosted run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub last_error: Option<String>,
}

/// One message read back from a thread, newest first.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: String,
    pub segments: Vec<MessageSegment>,
}

#[derive(Debug, Clone)]
pub struct MessageSegment {
    pub text: String,
    pub annotations: Vec<FileAnnotation>,
}

/// A file-path annotation inside an assistant reply; `text` is the placeholder
/// the reply embeds, `file_id` the remote object to download.
#[derive(Debug, Clone)]
pub struct FileAnnotation {
    pub text: String,
    pub file_id: String,
    pub file_name: String,
}

// ============================================================================
// Service Trait
// ============================================================================

/// The hosted conversational-agent runtime, modeled as an opaque dependency.
/// The runtime owns thread/run/message lifecycle and tool scheduling; this
/// side only supplies tool implementations via the registry.
#[async_trait]
pub trait AgentService: Send + Sync {
    async fn find_agent(&self, name: &str) -> Result<Option<AgentInfo>>;

    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentInfo>;

    async fn create_thread(&self) -> Result<String>;

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<String>;

    /// Executes one run and drives it to a terminal status, resolving tool
    /// calls through `tools` whenever the runtime asks. Waits indefinitely.
    async fn run_to_completion(
        &self,
        agent_id: &str,
        thread_id: &str,
        tools: &ToolRegistry,
    ) -> Result<RunOutcome>;

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    /// Downloads a remote file into the local working directory.
    async fn download_file(&self, file_id: &str, file_name: &str) -> Result<PathBuf>;
}

#[async_trait]
impl<S: AgentService + ?Sized> AgentService for std::sync::Arc<S> {
    async fn find_agent(&self, name: &str) -> Result<Option<AgentInfo>> {
        (**self).find_agent(name).await
    }

    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentInfo> {
        (**self).create_agent(request).await
    }

    async fn create_thread(&self) -> Result<String> {
        (**self).create_thread().await
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<String> {
        (**self).post_message(thread_id, content).await
    }

    async fn run_to_completion(
        &self,
        agent_id: &str,
        thread_id: &str,
        tools: &ToolRegistry,
    ) -> Result<RunOutcome> {
        (**self).run_to_completion(agent_id, thread_id, tools).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        (**self).list_messages(thread_id).await
    }

    async fn download_file(&self, file_id: &str, file_name: &str) -> Result<PathBuf> {
        (**self).download_file(file_id, file_name).await
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunState {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct ToolOutput {
    tool_call_id: String,
    output: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Vec<WireContentPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentPart {
    Text { text: WireText },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireText {
    value: String,
    #[serde(default)]
    annotations: Vec<WireAnnotation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAnnotation {
    FilePath {
        text: String,
        file_path: WireFileRef,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireFileRef {
    file_id: String,
}

fn convert_message(wire: WireMessage) -> ThreadMessage {
    let segments = wire
        .content
        .into_iter()
        .filter_map(|part| match part {
            WireContentPart::Text { text } => Some(MessageSegment {
                text: text.value,
                annotations: text
                    .annotations
                    .into_iter()
                    .filter_map(|a| match a {
                        WireAnnotation::FilePath { text, file_path } => {
                            let file_name = text
                                .rsplit('/')
                                .next()
                                .unwrap_or("download.bin")
                                .to_string();
                            Some(FileAnnotation {
                                text,
                                file_id: file_path.file_id,
                                file_name,
                            })
                        }
                        WireAnnotation::Other => None,
                    })
                    .collect(),
            }),
            WireContentPart::Other => None,
        })
        .collect();

    ThreadMessage {
        role: wire.role,
        segments,
    }
}

// ============================================================================
// HTTP Implementation
// ============================================================================

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct HttpAgentService {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpAgentService {
    pub fn new(config: &AgentProjectConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::agent_run(format!("agent service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::agent_run(format!(
                "agent service returned {}: {}",
                status, body
            )));
        }
        Ok(response)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.get(self.url(path))).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::agent_run(format!("agent service sent bad JSON: {}", e)))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::agent_run(format!("agent service sent bad JSON: {}", e)))
    }

    async fn resolve_tool_calls(
        &self,
        thread_id: &str,
        run: &RunState,
        tools: &ToolRegistry,
    ) -> Result<()> {
        let Some(action) = &run.required_action else {
            return Err(AppError::agent_run(
                "run requires action but carries no tool calls",
            ));
        };

        let mut outputs = Vec::new();
        for call in &action.submit_tool_outputs.tool_calls {
            let args: Value = serde_json::from_str(&call.function.arguments).map_err(|e| {
                AppError::agent_run(format!(
                    "malformed arguments for tool '{}': {}",
                    call.function.name, e
                ))
            })?;
            let output = tools.dispatch(&call.function.name, args).await?;
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }

        let _: Value = self
            .post_json(
                &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run.id),
                &serde_json::json!({ "tool_outputs": outputs }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn find_agent(&self, name: &str) -> Result<Option<AgentInfo>> {
        let listing: ListEnvelope<AgentInfo> = self.get_json("/assistants").await?;
        Ok(listing.data.into_iter().find(|a| a.name == name))
    }

    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentInfo> {
        self.post_json("/assistants", &request).await
    }

    async fn create_thread(&self) -> Result<String> {
        let created: CreatedObject = self
            .post_json("/threads", &serde_json::json!({}))
            .await?;
        Ok(created.id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<String> {
        let created: CreatedObject = self
            .post_json(
                &format!("/threads/{}/messages", thread_id),
                &serde_json::json!({ "role": "user", "content": content }),
            )
            .await?;
        Ok(created.id)
    }

    async fn run_to_completion(
        &self,
        agent_id: &str,
        thread_id: &str,
        tools: &ToolRegistry,
    ) -> Result<RunOutcome> {
        let mut run: RunState = self
            .post_json(
                &format!("/threads/{}/runs", thread_id),
                &serde_json::json!({ "assistant_id": agent_id }),
            )
            .await?;

        // No timeout: the run is polled until the runtime reaches a terminal state
        loop {
            match run.status {
                RunStatus::RequiresAction => {
                    self.resolve_tool_calls(thread_id, &run, tools).await?;
                }
                status if status.is_terminal() => break,
                status => {
                    log::debug!("run {} is {}", run.id, status);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
            run = self
                .get_json(&format!("/threads/{}/runs/{}", thread_id, run.id))
                .await?;
        }

        Ok(RunOutcome {
            status: run.status,
            last_error: run.last_error.map(|e| {
                format!("{}: {}", e.code.unwrap_or_else(|| "unknown".into()), e.message)
            }),
        })
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let listing: ListEnvelope<WireMessage> = self
            .get_json(&format!("/threads/{}/messages", thread_id))
            .await?;
        Ok(listing.data.into_iter().map(convert_message).collect())
    }

    async fn download_file(&self, file_id: &str, file_name: &str) -> Result<PathBuf> {
        let response = self
            .send(self.http.get(self.url(&format!("/files/{}/content", file_id))))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::agent_run(format!("file download failed: {}", e)))?;

        let target = PathBuf::from(file_name);
        std::fs::write(&target, &bytes)?;
        Ok(target)
    }
}

// ============================================================================
// Tests
// ============================================================================
