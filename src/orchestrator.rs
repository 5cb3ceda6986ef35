use std::path::Path;

use strum::Display;

use crate::error::{AppError, Result};
use crate::runtime::{AgentService, CreateAgentRequest, FunctionTool, RunStatus};
use crate::tools::ToolRegistry;

// ============================================================================
// Agent Identity
// ============================================================================

pub const AGENT_NAME: &str = "tabular-insight-agent";

const AGENT_INSTRUCTIONS: &str = "You are a data analysis assistant. When asked about a tabular \
    dataset, first call generate_analysis to produce a chart for the question, then call \
    visual_analysis with the returned image path to read the chart, and answer the question \
    from that interpretation. If generate_analysis reports that no chart could be produced, \
    relay its column listing so the user can rephrase.";

// ============================================================================
// Run Phases
// ============================================================================

/// The local view of one question/answer cycle. The hosted runtime owns the
/// run itself; these phases only track this side's progress through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    AgentResolved,
    ThreadCreated,
    MessagePosted,
    Running,
    Completed,
    Failed,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator<S: AgentService> {
    service: S,
    tools: ToolRegistry,
    model: String,
}

impl<S: AgentService> Orchestrator<S> {
    pub fn new(service: S, tools: ToolRegistry, model: String) -> Self {
        Self {
            service,
            tools,
            model,
        }
    }

    /// Drives one question through the hosted agent: resolve the agent by
    /// name, open a thread, post the question, let the runtime call tools,
    /// then read the final assistant message back.
    pub async fn run_agent(
        &self,
        question: &str,
        data_path: &Path,
        output_dir: &Path,
    ) -> Result<String> {
        let mut phase = RunPhase::NotStarted;

        let agent = self.resolve_agent().await?;
        phase = advance(phase, RunPhase::AgentResolved);

        let thread_id = self.service.create_thread().await?;
        phase = advance(phase, RunPhase::ThreadCreated);

        let content = compose_message(&self.model, question, data_path, output_dir);
        self.service.post_message(&thread_id, &content).await?;
        phase = advance(phase, RunPhase::MessagePosted);

        phase = advance(phase, RunPhase::Running);
        let outcome = self
            .service
            .run_to_completion(&agent.id, &thread_id, &self.tools)
            .await?;

        if outcome.status == RunStatus::Completed {
            advance(phase, RunPhase::Completed);
        } else {
            // Degraded mode: log the failure but still read back whatever
            // messages the thread holds
            advance(phase, RunPhase::Failed);
            log::error!(
                "run ended {}: {}",
                outcome.status,
                outcome.last_error.as_deref().unwrap_or("no error recorded")
            );
        }

        let messages = self.service.list_messages(&thread_id).await?;

        for message in messages.iter().filter(|m| m.role == "assistant") {
            for segment in &message.segments {
                for annotation in &segment.annotations {
                    let saved = self
                        .service
                        .download_file(&annotation.file_id, &annotation.file_name)
                        .await?;
                    log::info!("💾 Saved agent file to {}", saved.display());
                }
            }
        }

        messages
            .iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| m.segments.first())
            .map(|s| s.text.clone())
            .ok_or_else(|| AppError::agent_run("no answer returned"))
    }

    /// Lookup-before-create by fixed name. Two concurrent first-time callers
    /// can both miss the lookup and each create a definition; that duplicate
    /// is accepted, not guarded against.
    async fn resolve_agent(&self) -> Result<crate::runtime::AgentInfo> {
        if let Some(agent) = self.service.find_agent(AGENT_NAME).await? {
            log::info!("♻️ Reusing agent '{}' ({})", agent.name, agent.id);
            return Ok(agent);
        }

        let agent = self
            .service
            .create_agent(CreateAgentRequest {
                name: AGENT_NAME.to_string(),
                instructions: AGENT_INSTRUCTIONS.to_string(),
                model: self.model.clone(),
                tools: FunctionTool::from_definitions(self.tools.definitions()),
            })
            .await?;
        log::info!("✨ Created agent '{}' ({})", agent.name, agent.id);
        Ok(agent)
    }
}

fn advance(from: RunPhase, to: RunPhase) -> RunPhase {
    log::debug!("run phase {} -> {}", from, to);
    to
}

/// The user message is free prose; the remote agent parses the details out of
/// it rather than receiving structured fields.
fn compose_message(model: &str, question: &str, data_path: &Path, output_dir: &Path) -> String {
    format!(
        "Today is {}. Use the model deployment '{}'. The dataset file is at {} and any \
         generated artifacts belong in {}. Question: {}",
        chrono::Utc::now().format("%Y-%m-%d"),
        model,
        data_path.display(),
        output_dir.display(),
        question
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        AgentInfo, FileAnnotation, MessageSegment, RunOutcome, ThreadMessage,
    };
    use crate::tools::{AgentTool, ToolDefinition, ToolError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(&self, args: Value) -> std::result::Result<String, ToolError> {
            Ok(args.to_string())
        }
    }

    #[derive(Default)]
    struct MockAgentService {
        existing_agents: Vec<AgentInfo>,
        run_status: Option<RunStatus>,
        run_error: Option<String>,
        messages: Vec<ThreadMessage>,
        dispatch_echo_during_run: bool,

        created: Mutex<u32>,
        posted: Mutex<Vec<String>>,
        downloads: Mutex<Vec<String>>,
        echo_output: Mutex<Option<String>>,
    }

    #[async_trait]
    impl AgentService for MockAgentService {
        async fn find_agent(&self, name: &str) -> crate::error::Result<Option<AgentInfo>> {
            Ok(self.existing_agents.iter().find(|a| a.name == name).cloned())
        }

        async fn create_agent(
            &self,
            request: CreateAgentRequest,
        ) -> crate::error::Result<AgentInfo> {
            *self.created.lock().unwrap() += 1;
            Ok(AgentInfo {
                id: "agent_new".to_string(),
                name: request.name,
            })
        }

        async fn create_thread(&self) -> crate::error::Result<String> {
            Ok("thread_1".to_string())
        }

        async fn post_message(
            &self,
            _thread_id: &str,
            content: &str,
        ) -> crate::error::Result<String> {
            self.posted.lock().unwrap().push(content.to_string());
            Ok("msg_1".to_string())
        }

        async fn run_to_completion(
            &self,
            _agent_id: &str,
            _thread_id: &str,
            tools: &ToolRegistry,
        ) -> crate::error::Result<RunOutcome> {
            if self.dispatch_echo_during_run {
                let output = tools
                    .dispatch("echo", serde_json::json!({"ping": true}))
                    .await
                    .map_err(crate::error::AppError::from)?;
                *self.echo_output.lock().unwrap() = Some(output);
            }
            Ok(RunOutcome {
                status: self.run_status.unwrap_or(RunStatus::Completed),
                last_error: self.run_error.clone(),
            })
        }

        async fn list_messages(
            &self,
            _thread_id: &str,
        ) -> crate::error::Result<Vec<ThreadMessage>> {
            Ok(self.messages.clone())
        }

        async fn download_file(
            &self,
            file_id: &str,
            file_name: &str,
        ) -> crate::error::Result<PathBuf> {
            self.downloads.lock().unwrap().push(file_id.to_string());
            Ok(PathBuf::from(file_name))
        }
    }

    fn assistant_message(text: &str) -> ThreadMessage {
        ThreadMessage {
            role: "assistant".to_string(),
            segments: vec![MessageSegment {
                text: text.to_string(),
                annotations: vec![],
            }],
        }
    }

    fn orchestrator(service: MockAgentService) -> Orchestrator<MockAgentService> {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        Orchestrator::new(service, tools, "gpt-4o".to_string())
    }

    #[tokio::test]
    async fn test_existing_agent_is_not_recreated() {
        let service = MockAgentService {
            existing_agents: vec![AgentInfo {
                id: "agent_0".to_string(),
                name: AGENT_NAME.to_string(),
            }],
            messages: vec![assistant_message("The profit was 576.")],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        let answer = orchestrator
            .run_agent("profit?", Path::new("data.csv"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(answer, "The profit was 576.");
        assert_eq!(*orchestrator.service.created.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_agent_is_created_once() {
        let service = MockAgentService {
            messages: vec![assistant_message("done")],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        orchestrator
            .run_agent("q", Path::new("data.csv"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(*orchestrator.service.created.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_message_contains_all_context_as_prose() {
        let service = MockAgentService {
            messages: vec![assistant_message("ok")],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        orchestrator
            .run_agent(
                "What was the profit for Carreterra in Germany for Dec?",
                Path::new("financial_sample.xlsx"),
                Path::new("./output"),
            )
            .await
            .unwrap();

        let posted = orchestrator.service.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        let content = &posted[0];
        assert!(content.contains("financial_sample.xlsx"));
        assert!(content.contains("./output"));
        assert!(content.contains("gpt-4o"));
        assert!(content.contains("Carreterra"));
        assert!(content.contains(&chrono::Utc::now().format("%Y-%m-%d").to_string()));
    }

    #[tokio::test]
    async fn test_failed_run_still_reads_messages() {
        let service = MockAgentService {
            run_status: Some(RunStatus::Failed),
            run_error: Some("server_error: boom".to_string()),
            messages: vec![assistant_message("partial answer")],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        let answer = orchestrator
            .run_agent("q", Path::new("d.csv"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(answer, "partial answer");
    }

    #[tokio::test]
    async fn test_no_assistant_message_is_an_error() {
        let service = MockAgentService {
            messages: vec![ThreadMessage {
                role: "user".to_string(),
                segments: vec![MessageSegment {
                    text: "question".to_string(),
                    annotations: vec![],
                }],
            }],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        let err = orchestrator
            .run_agent("q", Path::new("d.csv"), Path::new("out"))
            .await
            .unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::AgentRunError);
        assert!(err.message.contains("no answer"));
    }

    #[tokio::test]
    async fn test_newest_assistant_message_wins() {
        let service = MockAgentService {
            messages: vec![
                assistant_message("final summary"),
                assistant_message("intermediate note"),
            ],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        let answer = orchestrator
            .run_agent("q", Path::new("d.csv"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(answer, "final summary");
    }

    #[tokio::test]
    async fn test_file_annotations_are_downloaded() {
        let mut message = assistant_message("see sandbox:/mnt/data/chart.png");
        message.segments[0].annotations.push(FileAnnotation {
            text: "sandbox:/mnt/data/chart.png".to_string(),
            file_id: "f_42".to_string(),
            file_name: "chart.png".to_string(),
        });
        let service = MockAgentService {
            messages: vec![message],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        orchestrator
            .run_agent("q", Path::new("d.csv"), Path::new("out"))
            .await
            .unwrap();

        assert_eq!(
            *orchestrator.service.downloads.lock().unwrap(),
            vec!["f_42".to_string()]
        );
    }

    #[tokio::test]
    async fn test_registry_is_reachable_from_the_run() {
        let service = MockAgentService {
            dispatch_echo_during_run: true,
            messages: vec![assistant_message("done")],
            ..Default::default()
        };
        let orchestrator = orchestrator(service);

        orchestrator
            .run_agent("q", Path::new("d.csv"), Path::new("out"))
            .await
            .unwrap();

        let echoed = orchestrator.service.echo_output.lock().unwrap();
        assert_eq!(echoed.as_deref(), Some("{\"ping\":true}"));
    }
}
