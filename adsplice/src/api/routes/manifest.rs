//! Viewer manifest endpoint.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use hls_splice::InsertionMode;
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::config::ChannelKey;
use crate::decision::ViewerContext;
use crate::service::ManifestRequest;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Default, Deserialize)]
pub struct ManifestQuery {
    /// Overrides the channel's insertion mode, for testing players.
    pub force: Option<InsertionMode>,
    /// Opaque viewer id used to bucket per-viewer decisions.
    pub viewer: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{org}/{channel}/{variant}", get(get_manifest))
}

async fn get_manifest(
    State(state): State<AppState>,
    Path((org, channel, variant)): Path<(String, String, String)>,
    Query(query): Query<ManifestQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = ManifestRequest {
        key: ChannelKey::new(org, channel),
        variant,
        force: query.force,
        viewer: ViewerContext {
            viewer_id: query.viewer,
            user_agent,
        },
    };

    let served = state.manifests.serve(&request).await?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        served.body,
    )
        .into_response())
}
