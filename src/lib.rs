pub mod analysis;
pub mod chart;
pub mod error;
pub mod handlers;
pub mod init;
pub mod loader;
pub mod orchestrator;
pub mod runtime;
pub mod tools;
pub mod vision;

pub use crate::analysis::{AnalysisGenerator, AnalysisOutcome};
pub use crate::init::{AppState, Config};
pub use crate::orchestrator::{AGENT_NAME, Orchestrator};
pub use crate::tools::ToolRegistry;
