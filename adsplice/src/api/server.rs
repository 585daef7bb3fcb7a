//! HTTP server: state shared by handlers, middleware and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tracing::{Level, info};

use crate::api::routes;
use crate::channel::ChannelRegistry;
use crate::config::{AppConfig, ConfigService};
use crate::container::ServiceContainer;
use crate::decision::DecisionCache;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::service::ManifestService;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self {
            bind_address: app.bind_address,
            port: app.port,
            enable_cors: app.enable_cors,
        }
    }
}

impl From<&AppConfig> for ApiServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub manifests: Arc<ManifestService>,
    pub registry: Arc<ChannelRegistry>,
    pub config_service: Arc<ConfigService>,
    pub decisions: Arc<DecisionCache>,
    /// Present when the process owns a reloadable log filter.
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn from_container(container: &ServiceContainer) -> Self {
        Self {
            start_time: Instant::now(),
            manifests: container.manifests.clone(),
            registry: container.registry.clone(),
            config_service: container.config_service.clone(),
            decisions: container.decisions.clone(),
            logging_config: None,
        }
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("invalid bind address: {}", e)))
    }

    /// Traced API routes plus untraced health checks, with CORS on top
    /// when enabled.
    pub fn build_router(&self) -> Router {
        let traced = routes::api_router(self.state.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                )
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );
        let router = traced.merge(routes::health_router(self.state.clone()));

        if !self.config.enable_cors {
            return router;
        }
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    }

    /// Serves until the cancellation token fires, then drains open
    /// connections.
    pub async fn run(&self) -> Result<()> {
        let addr = self.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "API server listening");

        let token = self.cancel_token.clone();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                info!("API server draining connections");
            })
            .await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 12560);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: false,
            ..AppConfig::default()
        };
        let config = ApiServerConfig::from(&app);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(!config.enable_cors);
    }
}
