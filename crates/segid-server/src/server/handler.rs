//! HTTP routes over a [`SegmentRegistry`].
//!
//! - `GET /id/{tag}`: the next id for `tag`, as plain text.
//! - `GET /ids/{tag}?count=N`: `N` consecutive ids for `tag`, as JSON. The
//!   batch is taken in one go, so concurrent requests never interleave.
//! - `GET /status/{tag}`: the allocator's [`AllocatorStatus`], as JSON.
//! - `GET /health`: `ok` while the server accepts requests.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use portable_atomic::{AtomicUsize, Ordering};
use segid::{AllocatorStatus, RefillStrategy, SegmentRegistry, SequenceRepository};
use serde::{Deserialize, Serialize};

use crate::server::error::ApiError;

const MAX_TAG_LEN: usize = 128;

pub struct AppState<R, S> {
    registry: Arc<SegmentRegistry<R, S>>,
    max_ids_per_request: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<R, S> Clone for AppState<R, S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            max_ids_per_request: self.max_ids_per_request,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R, S> AppState<R, S> {
    pub fn new(registry: Arc<SegmentRegistry<R, S>>, max_ids_per_request: usize) -> Self {
        Self {
            registry,
            max_ids_per_request,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<SegmentRegistry<R, S>> {
        &self.registry
    }

    /// Requests currently inside an id handler.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn track(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight(Arc::clone(&self.in_flight))
    }
}

/// Decrements the in-flight counter when the handler finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Deserialize)]
pub struct IdsQuery {
    #[serde(default = "default_count")]
    count: usize,
}

const fn default_count() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct IdsResponse {
    tag: String,
    ids: Vec<u64>,
}

pub fn router<R, S>(state: AppState<R, S>) -> Router
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    Router::new()
        .route("/id/{tag}", get(next_id::<R, S>))
        .route("/ids/{tag}", get(next_ids::<R, S>))
        .route("/status/{tag}", get(status::<R, S>))
        .route("/health", get(health))
        .with_state(state)
}

fn validate_tag(tag: &str) -> Result<(), ApiError> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidTag(tag.to_owned()))
    }
}

#[tracing::instrument(level = "debug", skip(state))]
async fn next_id<R, S>(
    State(state): State<AppState<R, S>>,
    Path(tag): Path<String>,
) -> Result<String, ApiError>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    validate_tag(&tag)?;
    let _in_flight = state.track();
    let id = state.registry.next_id(&tag).await?;
    Ok(id.to_string())
}

#[tracing::instrument(level = "debug", skip(state))]
async fn next_ids<R, S>(
    State(state): State<AppState<R, S>>,
    Path(tag): Path<String>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<IdsResponse>, ApiError>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    validate_tag(&tag)?;
    if query.count == 0 || query.count > state.max_ids_per_request {
        return Err(ApiError::InvalidCount {
            count: query.count,
            max: state.max_ids_per_request,
        });
    }

    let _in_flight = state.track();
    let ids = state.registry.next_ids(&tag, query.count).await?;
    Ok(Json(IdsResponse { tag, ids }))
}

async fn status<R, S>(
    State(state): State<AppState<R, S>>,
    Path(tag): Path<String>,
) -> Result<Json<AllocatorStatus>, ApiError>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    validate_tag(&tag)?;
    state
        .registry
        .status(&tag)
        .await
        .map(Json)
        .ok_or(ApiError::UnknownTag(tag))
}

async fn health() -> &'static str {
    "ok"
}
