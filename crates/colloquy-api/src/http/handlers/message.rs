//! Message intake handler: the gateway's main entry point.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use colloquy_types::conversation::InboundMessage;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/messages - Process one inbound message and return the reply.
///
/// The body is the full inbound message; the conversation key travels as a
/// string like `private:42`. Blocks until the reply is produced or the
/// pipeline refuses (slot timeout, quota, provider exhaustion).
pub async fn process_message(
    State(state): State<AppState>,
    Json(body): Json<InboundMessage>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let outcome = state.chat_service.process_message(body).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = serde_json::to_value(&outcome).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(ApiResponse::success(data, request_id, elapsed).with_link(
        "settings",
        &format!("/api/v1/conversations/{}/settings", outcome.conversation_key),
    ))
}
