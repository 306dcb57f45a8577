//! strata REST server.
//!
//! Exposes key lookups under `GET /lookup/{key}`. Query parameters mirror
//! the CLI lookup surface: `default`, `merge`, `type` and repeatable
//! `var=key:value` scope variables. Responses are JSON renderings of the
//! looked-up value.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use strata_core::{CommandOptions, RenderAs, Session};

pub mod error;

use error::ApiError;

/// Shared server state: the engine session plus the options every
/// request starts from (server-level `--var`/`--vars` flags).
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub base_options: CommandOptions,
}

impl AppState {
    pub fn new(session: Session, base_options: CommandOptions) -> Self {
        Self {
            session: Arc::new(session),
            base_options,
        }
    }
}

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/lookup/{key}", get(lookup_key))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// `GET /lookup/{key}` — look up one key and render it as JSON.
async fn lookup_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let mut options = state.base_options.clone();
    options.render_as = Some(RenderAs::Json);
    for (name, value) in params {
        match name.as_str() {
            "default" => {
                if options.default.is_none() {
                    options.default = Some(value);
                }
            }
            "merge" => options.merge = Some(value),
            "type" => options.value_type = Some(value),
            "var" => options.variables.push(value),
            _ => {}
        }
    }

    tracing::info!("lookup key={}", key);

    let mut out = Vec::new();
    let found =
        strata_core::lookup_and_render(&state.session, &options, &[key], None, &mut out)?;
    if !found {
        return Err(ApiError::NotFound);
    }
    Ok((
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        out,
    )
        .into_response())
}
