//! Logging API routes: view and change the active log filter.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

#[derive(Debug, Deserialize)]
pub struct FilterUpdate {
    /// An `EnvFilter` directive string, e.g. `adsplice=debug,scte35=trace`.
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct FilterView {
    pub filter: String,
    pub modules: Vec<ModuleEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModuleEntry {
    pub name: &'static str,
    pub description: &'static str,
}

impl FilterView {
    fn current(logging: &LoggingConfig) -> Self {
        let modules = available_modules()
            .into_iter()
            .map(|(name, description)| ModuleEntry { name, description })
            .collect();
        Self {
            filter: logging.get_filter(),
            modules,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(show_filter).put(replace_filter))
}

fn reloadable(state: &AppState) -> ApiResult<&LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::internal("Log filter is not reloadable in this process"))
}

async fn show_filter(State(state): State<AppState>) -> ApiResult<Json<FilterView>> {
    Ok(Json(FilterView::current(reloadable(&state)?)))
}

async fn replace_filter(
    State(state): State<AppState>,
    Json(update): Json<FilterUpdate>,
) -> ApiResult<Json<FilterView>> {
    let logging = reloadable(&state)?;
    logging
        .set_filter(&update.filter)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(FilterView::current(logging)))
}
