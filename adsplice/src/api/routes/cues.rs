//! Cue injection. Lets an operator or an upstream encoder push a cue
//! directly instead of waiting for the monitor to see it in the playlist.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use scte35::{CueKind, CueSignal, CueSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::channel::ChannelMessage;
use crate::config::ChannelKey;

#[derive(Debug, Default, Deserialize)]
pub struct CueRequest {
    /// Hex or base64 splice_info_section.
    pub payload: Option<String>,
    /// A playlist cue tag line, tried when `payload` is absent or undecodable.
    pub tag: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CueAccepted {
    pub id: String,
    pub kind: CueKind,
    pub source: CueSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{org}/{channel}/cues", post(submit_cue))
}

/// Decode the request, binary form first.
fn decode(request: &CueRequest) -> ApiResult<CueSignal> {
    let mut failures = Vec::new();

    if let Some(payload) = request.payload.as_deref() {
        match scte35::parse_payload(payload) {
            Ok(signal) => return Ok(signal),
            Err(e) => failures.push(format!("payload: {e}")),
        }
    }
    if let Some(tag) = request.tag.as_deref() {
        match scte35::parse_tag_line(tag.trim()) {
            Ok(signal) => return Ok(signal),
            Err(e) => failures.push(format!("tag: {e}")),
        }
    }

    if failures.is_empty() {
        Err(ApiError::bad_request("Either payload or tag is required"))
    } else {
        Err(ApiError::validation("Cue could not be decoded")
            .with_details(serde_json::json!({ "errors": failures })))
    }
}

async fn submit_cue(
    State(state): State<AppState>,
    Path((org, channel)): Path<(String, String)>,
    Json(request): Json<CueRequest>,
) -> ApiResult<(StatusCode, Json<CueAccepted>)> {
    let key = ChannelKey::new(org, channel);
    let signal = decode(&request)?;

    let accepted = CueAccepted {
        id: signal.id().to_string(),
        kind: signal.kind(),
        source: signal.source(),
        event_id: signal.event_id(),
    };
    debug!(channel = %key, cue = %accepted.id, "Cue submitted");

    state.registry.send(&key, ChannelMessage::Cue(signal)).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BREAK_START_B64: &str =
        "/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=";

    #[test]
    fn test_decode_payload() {
        let request = CueRequest {
            payload: Some(BREAK_START_B64.to_string()),
            tag: None,
        };
        let signal = decode(&request).unwrap();
        assert_eq!(signal.source(), CueSource::BinaryDecoded);
        assert_eq!(signal.event_id(), Some(0x4800_008F));
    }

    #[test]
    fn test_decode_falls_back_to_tag() {
        let request = CueRequest {
            payload: Some("not a section".to_string()),
            tag: Some("#EXT-X-CUE-OUT:30".to_string()),
        };
        let signal = decode(&request).unwrap();
        assert_eq!(signal.source(), CueSource::AttributeDecoded);
        assert_eq!(signal.kind(), CueKind::BreakStart);
    }

    #[test]
    fn test_decode_failures() {
        let err = decode(&CueRequest::default()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = decode(&CueRequest {
            payload: Some("zz".to_string()),
            tag: Some("#EXTINF:6.0,".to_string()),
        })
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.details.is_some());
    }
}
