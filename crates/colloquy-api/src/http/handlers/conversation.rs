//! Per-conversation management handlers: clear, overrides, settings.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use colloquy_types::conversation::UserId;

use crate::http::error::AppError;
use crate::http::handlers::parse_key;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body carrying only the acting identity.
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    /// Identity performing the action.
    pub user: i64,
}

/// Request body for pinning a provider. `provider: null` unpins.
#[derive(Debug, Deserialize)]
pub struct SetProviderRequest {
    pub user: i64,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Request body for a system prompt override. `prompt: null` clears.
#[derive(Debug, Deserialize)]
pub struct SetPromptRequest {
    pub user: i64,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Request body for a temperature override. `temperature: null` clears.
#[derive(Debug, Deserialize)]
pub struct SetTemperatureRequest {
    pub user: i64,
    #[serde(default)]
    pub temperature: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/conversations/{key}/clear - Drop history and summary.
pub async fn clear_conversation(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ActorRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let key = parse_key(&key)?;

    state
        .chat_service
        .clear_conversation(key, UserId(body.user))
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({"cleared": true, "conversation_key": key.to_string()}),
        request_id,
        elapsed,
    ))
}

/// PUT /api/v1/conversations/{key}/provider - Pin or unpin a provider.
pub async fn set_provider(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SetProviderRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let key = parse_key(&key)?;

    let canonical = state
        .chat_service
        .set_provider_preference(key, UserId(body.user), body.provider.as_deref())
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({"provider": canonical}),
        request_id,
        elapsed,
    ))
}

/// PUT /api/v1/conversations/{key}/prompt - Set or clear the system prompt.
pub async fn set_prompt(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SetPromptRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let key = parse_key(&key)?;

    state
        .chat_service
        .set_system_prompt(key, UserId(body.user), body.prompt.as_deref())
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({"prompt": body.prompt}),
        request_id,
        elapsed,
    ))
}

/// PUT /api/v1/conversations/{key}/temperature - Set or clear the temperature.
pub async fn set_temperature(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SetTemperatureRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let key = parse_key(&key)?;

    state
        .chat_service
        .set_temperature(key, UserId(body.user), body.temperature)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({"temperature": body.temperature}),
        request_id,
        elapsed,
    ))
}

/// GET /api/v1/conversations/{key}/settings - Current override settings.
pub async fn get_settings(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let key = parse_key(&key)?;

    let overview = state.chat_service.settings_overview(key).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({
            "system_prompt": overview.system_prompt,
            "provider": overview.provider,
            "temperature": overview.temperature,
        }),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/conversations/{key}/settings")))
}
