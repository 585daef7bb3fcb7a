//! Channel state and configuration routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::channel::{ChannelMessage, ChannelSnapshot};
use crate::config::ChannelKey;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub channel: ChannelKey,
    /// Cached decisions dropped for the channel.
    pub decisions_dropped: usize,
    /// Whether a running actor was sent the fresh config.
    pub actor_updated: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{org}/{channel}/state", get(channel_state))
        .route("/{org}/{channel}/config/invalidate", post(invalidate_config))
}

async fn channel_state(
    State(state): State<AppState>,
    Path((org, channel)): Path<(String, String)>,
) -> ApiResult<Json<ChannelSnapshot>> {
    let key = ChannelKey::new(org, channel);
    Ok(Json(state.registry.snapshot(&key).await?))
}

async fn invalidate_config(
    State(state): State<AppState>,
    Path((org, channel)): Path<(String, String)>,
) -> ApiResult<Json<InvalidateResponse>> {
    let key = ChannelKey::new(org, channel);

    let Some(config) = state.config_service.refresh(&key).await? else {
        state.registry.remove(&key);
        return Err(ApiError::not_found(format!("Channel '{}' not found", key)));
    };
    let decisions_dropped = state.decisions.invalidate_channel(&key);

    let actor_updated = match state.registry.get(&key) {
        Some(handle) => {
            handle
                .send(ChannelMessage::ConfigUpdate(config))
                .await
                .map_err(crate::Error::from)?;
            true
        }
        None => false,
    };

    info!(channel = %key, decisions_dropped, actor_updated, "Channel config invalidated");
    Ok(Json(InvalidateResponse {
        channel: key,
        decisions_dropped,
        actor_updated,
    }))
}
