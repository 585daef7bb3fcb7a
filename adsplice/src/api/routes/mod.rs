//! API route modules.
//!
//! Channel routes live under `/{org}/{channel}`; the viewer manifest route
//! takes any other last segment as the variant name.

pub mod breaks;
pub mod channels;
pub mod cues;
pub mod health;
pub mod logging;
pub mod manifest;

use axum::Router;

use crate::api::server::AppState;

/// Channel, cue, manifest and logging routes.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/logging", logging::router())
        .merge(cues::router())
        .merge(breaks::router())
        .merge(channels::router())
        .merge(manifest::router())
        .with_state(state)
}

/// Liveness checks, kept apart so the server can leave them untraced.
pub fn health_router(state: AppState) -> Router {
    Router::new().nest("/health", health::router()).with_state(state)
}

pub fn create_router(state: AppState) -> Router {
    api_router(state.clone()).merge(health_router(state))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::config::{AppConfig, ChannelConfig, ChannelKey, StaticConfigLookup};
    use crate::container::{ServiceContainer, ServiceParts};
    use crate::decision::StaticDecisionSource;
    use crate::events::TracingEventSink;
    use crate::origin::StaticOriginSource;
    use crate::variant::{ChannelTranscodeQueue, InMemoryAssetStore, InMemoryLockStore};

    const PLAYLIST: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.000,\nseg1.ts\n";

    fn container() -> ServiceContainer {
        let key = ChannelKey::new("acme", "news");
        let origin = StaticOriginSource::new();
        origin.set(key.clone(), "800k.m3u8", PLAYLIST);
        let (queue, jobs) = ChannelTranscodeQueue::new(8);
        let parts = ServiceParts {
            channels: Arc::new(StaticConfigLookup::new([ChannelConfig::new(&key)])),
            decision_source: Arc::new(StaticDecisionSource::filler("slate")),
            origin: Arc::new(origin),
            blobs: Arc::new(InMemoryBlobStore::new()),
            assets: Arc::new(InMemoryAssetStore::new()),
            locks: Arc::new(InMemoryLockStore::new()),
            transcode_queue: Arc::new(queue),
            transcode_jobs: Some(jobs),
            events: Arc::new(TracingEventSink),
        };
        ServiceContainer::with_parts(AppConfig::default(), parts).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let container = container();
        let router = create_router(AppState::from_container(&container));
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_manifest_passthrough() {
        let container = container();
        let router = create_router(AppState::from_container(&container));

        let request = Request::get("/acme/news/800k.m3u8?force=ssai")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            manifest::PLAYLIST_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], PLAYLIST.as_bytes());

        let request = Request::get("/acme/news/9000k.m3u8").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "BAD_GATEWAY");

        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_cue() {
        let container = container();
        let router = create_router(AppState::from_container(&container));

        let (status, body) = send(
            &router,
            json_request("POST", "/acme/news/cues", serde_json::json!({"tag": "#EXT-X-CUE-OUT:30"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["kind"], "break_start");
        assert_eq!(body["source"], "attribute_decoded");

        let (status, _) = send(&router, json_request("POST", "/acme/news/cues", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &router,
            json_request("POST", "/acme/news/cues", serde_json::json!({"payload": "garbage!"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(
            &router,
            json_request("POST", "/acme/sports/cues", serde_json::json!({"tag": "#EXT-X-CUE-IN"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_break_and_state() {
        let container = container();
        let router = create_router(AppState::from_container(&container));

        let (status, _) = send(
            &router,
            json_request("POST", "/acme/news/breaks", serde_json::json!({"seconds": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(
            &router,
            json_request("POST", "/acme/news/breaks", serde_json::json!({"seconds": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["trigger"], "manual");

        let (status, body) = send(
            &router,
            json_request("POST", "/acme/news/breaks", serde_json::json!({"seconds": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "BREAK_IN_PROGRESS");

        let request = Request::get("/acme/news/state").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"]["state"], "break_active");
        assert_eq!(body["breaks_started"], 1);

        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalidate_config() {
        let container = container();
        let router = create_router(AppState::from_container(&container));

        let (status, body) = send(
            &router,
            json_request("POST", "/acme/news/config/invalidate", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["actor_updated"], false);

        let (status, _) = send(
            &router,
            json_request("POST", "/acme/sports/config/invalidate", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_logging_without_config() {
        let container = container();
        let router = create_router(AppState::from_container(&container));
        let request = Request::get("/logging").body(Body::empty()).unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
