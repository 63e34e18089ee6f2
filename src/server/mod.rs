//! HTTP surface of the proxy
//!
//! Exposes `GET /api/treasury` for the appraisal lookup UI and `GET /healthz`
//! for liveness checks.

mod response;

pub use response::{success_response, ApiError, FETCH_ERROR, TIMEOUT_ERROR};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query as QueryParams, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::cache::DatasetCache;
use crate::config::Config;
use crate::data::PageSource;
use crate::query::{Query, QueryProcessor, RawQuery};

/// Response settings that do not affect query semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Include failure details in error bodies (non-production)
    pub expose_error_details: bool,
    /// `s-maxage` for unfiltered listings
    pub listing_max_age_secs: u64,
}

/// Shared state handed to every handler
pub struct AppState<S> {
    pub processor: Arc<QueryProcessor<S>>,
    pub cache: Arc<DatasetCache<S>>,
    pub http: HttpSettings,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            cache: Arc::clone(&self.cache),
            http: self.http.clone(),
        }
    }
}

impl<S: PageSource> AppState<S> {
    /// Wires cache, processor and settings from configuration
    pub fn from_config(config: &Config, source: Arc<S>) -> Self {
        let cache = Arc::new(DatasetCache::new(source.clone(), config.cache.settings()));
        let processor = Arc::new(QueryProcessor::new(
            config.server.mode,
            cache.clone(),
            source,
            config.query.name_field.clone(),
            config.query.limits(),
        ));
        Self {
            processor,
            cache,
            http: HttpSettings {
                expose_error_details: config.server.expose_error_details,
                listing_max_age_secs: config.server.listing_max_age_secs,
            },
        }
    }
}

/// Builds the application router
pub fn build_router<S>(state: AppState<S>) -> Router
where
    S: PageSource + 'static,
{
    Router::new()
        .route("/api/treasury", get(list_records::<S>))
        .route("/healthz", get(health::<S>))
        .with_state(state)
}

async fn list_records<S>(
    State(state): State<AppState<S>>,
    QueryParams(pairs): QueryParams<Vec<(String, String)>>,
) -> Response
where
    S: PageSource + 'static,
{
    let started = Instant::now();
    // First occurrence of a repeated key wins
    let raw = RawQuery::from_pairs(pairs);
    let query = Query::from_raw(&raw, state.processor.limits());

    match state.processor.process(&query).await {
        Ok(page) => {
            info!(
                search = %query.search,
                page = query.page,
                limit = query.limit,
                total = page.total,
                returned = page.records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "served treasury query"
            );
            success_response(page, query.has_search(), state.http.listing_max_age_secs)
        }
        Err(err) => {
            let api_error = ApiError::from_upstream(&err, state.http.expose_error_details);
            error!(
                search = %query.search,
                page = query.page,
                limit = query.limit,
                offset = err.offset(),
                attempts = err.attempts(),
                status = api_error.status().as_u16(),
                error = %err,
                "treasury query failed"
            );
            api_error.into_response()
        }
    }
}

async fn health<S>(State(state): State<AppState<S>>) -> Json<Value>
where
    S: PageSource + 'static,
{
    let snapshot = state.cache.peek().await;
    Json(json!({
        "status": "ok",
        "mode": state.processor.mode().as_str(),
        "cachedRecords": snapshot.as_ref().map(|s| s.len()),
        "fetchedAt": snapshot.map(|s| s.fetched_at.to_rfc3339()),
    }))
}
