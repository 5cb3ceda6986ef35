use std::path::Path;
use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result, log_error};
use crate::init::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub data_path: String,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/agent/ask
///
/// Runs one question/answer cycle through the hosted agent and returns the
/// final assistant message.
pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let request_id = Uuid::now_v7().to_string();
    if request.question.trim().is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }

    let output_dir = request
        .output_dir
        .unwrap_or_else(|| state.config.output_dir.clone());
    log::info!("❓ [{}] {}", request_id, request.question);

    let answer = state
        .orchestrator
        .run_agent(
            &request.question,
            Path::new(&request.data_path),
            Path::new(&output_dir),
        )
        .await
        .inspect_err(log_error)?;

    Ok(Json(AskResponse { request_id, answer }))
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_ask_request_parsing_defaults() {
        let request: AskRequest = serde_json::from_value(serde_json::json!({
            "question": "profit by country",
            "data_path": "financial_sample.xlsx"
        }))
        .unwrap();

        assert_eq!(request.question, "profit by country");
        assert!(request.output_dir.is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = tokio_test::assert_ok!(
            serde_json::to_value(health_check().await.0)
        );
        assert_eq!(response["status"], "ok");
    }
}
