//! Manual ad breaks.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::channel::{AdBreakWindow, ChannelMessage, SkipCause};
use crate::config::ChannelKey;

/// Covers a decision lookup at its full timeout.
const BREAK_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct BreakRequest {
    pub seconds: f64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{org}/{channel}/breaks", post(start_break))
}

async fn start_break(
    State(state): State<AppState>,
    Path((org, channel)): Path<(String, String)>,
    Json(request): Json<BreakRequest>,
) -> ApiResult<(StatusCode, Json<AdBreakWindow>)> {
    if !request.seconds.is_finite() || request.seconds <= 0.0 {
        return Err(ApiError::validation("seconds must be a positive number"));
    }

    let key = ChannelKey::new(org, channel);
    let handle = state.registry.get_or_spawn(&key).await?;

    let (reply, rx) = oneshot::channel();
    handle
        .send(ChannelMessage::ManualBreak {
            seconds: request.seconds,
            reply: Some(reply),
        })
        .await
        .map_err(crate::Error::from)?;

    let result = tokio::time::timeout(BREAK_REPLY_TIMEOUT, rx)
        .await
        .map_err(|_| ApiError::service_unavailable("Channel did not answer in time"))?
        .map_err(|_| ApiError::service_unavailable("Channel stopped"))?;

    match result {
        Ok(window) => Ok((StatusCode::CREATED, Json(window))),
        Err(SkipCause::BreakInProgress) => Err(ApiError::new(
            StatusCode::CONFLICT,
            "BREAK_IN_PROGRESS",
            "An ad break is already running",
        )),
        Err(cause) => Err(ApiError::validation(format!("Break skipped: {}", cause.as_str()))
            .with_details(serde_json::to_value(&cause).unwrap_or_default())),
    }
}
