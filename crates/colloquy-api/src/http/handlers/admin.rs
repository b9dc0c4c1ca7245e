//! Operational handlers: quota usage, provider listing, audit events.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use colloquy_types::conversation::UserId;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for the audit event listing.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Maximum events to return, newest first (default 50).
    #[serde(default = "default_events_limit")]
    pub limit: u32,
}

fn default_events_limit() -> u32 {
    50
}

/// GET /api/v1/quota/{user} - Quota usage snapshot for one identity.
pub async fn get_quota(
    State(state): State<AppState>,
    Path(user): Path<i64>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let stats = state.chat_service.quota_stats(UserId(user)).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(
        json!({
            "privileged": stats.privileged,
            "hourly_used": stats.hourly_used,
            "hourly_limit": stats.hourly_limit,
            "daily_used": stats.daily_used,
            "daily_limit": stats.daily_limit,
        }),
        request_id,
        elapsed,
    ))
}

/// GET /api/v1/providers - Configured providers in failover order.
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let providers: Vec<serde_json::Value> = state
        .provider_router
        .statuses()
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "model": s.model,
                "priority": s.priority,
                "enabled": s.enabled,
                "summarization": s.summarization,
                "reasoning": s.reasoning,
                "max_context_tokens": s.max_context_tokens,
            })
        })
        .collect();

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(providers, request_id, elapsed).with_link("self", "/api/v1/providers"))
}

/// GET /api/v1/events - Recent audit events, newest first.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<ApiResponse<Vec<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let events = state
        .events
        .recent(query.limit)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let events_json: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "kind": e.kind,
                "conversation_key": e.conversation_key,
                "user_id": e.user_id,
                "detail": e.detail,
                "created_at": e.created_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(ApiResponse::success(events_json, request_id, elapsed).with_link("self", "/api/v1/events"))
}
