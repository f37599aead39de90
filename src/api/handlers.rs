//! HTTP handlers.
//!
//! `PUT/GET/DELETE /v1/{key}` plus a health endpoint. Keys travel in
//! the path, values in the request body. Non-leader requests answer
//! 307 with the leader's public address in `Location`.

use crate::api::AppState;
use crate::core::error::KvError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub async fn healthz() -> &'static str {
    "tessera up and healthy"
}

pub async fn put_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let value = String::from_utf8_lossy(&body).into_owned();
    match state.coordinator.put(key.clone(), value).await {
        Ok(()) => {
            tracing::debug!(key = %key, "put completed");
            StatusCode::CREATED.into_response()
        }
        Err(err) => error_response(err, &key),
    }
}

pub async fn get_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.coordinator.get(&key).await {
        Ok(value) => {
            tracing::debug!(key = %key, "get completed");
            (StatusCode::OK, value).into_response()
        }
        Err(err) => error_response(err, &key),
    }
}

pub async fn delete_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.coordinator.delete(key.clone()).await {
        Ok(()) => {
            tracing::debug!(key = %key, "delete completed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err, &key),
    }
}

/// Map a domain error onto the HTTP vocabulary.
fn error_response(err: KvError, key: &str) -> Response {
    match err {
        KvError::KeyTooLarge { .. } | KvError::ValueTooLarge { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        KvError::NoSuchKey => StatusCode::NOT_FOUND.into_response(),
        KvError::NotLeader { leader_addr } => {
            let location = format!("{leader_addr}/v1/{key}");
            (
                StatusCode::TEMPORARY_REDIRECT,
                [(header::LOCATION, location)],
            )
                .into_response()
        }
        KvError::NoLeader => {
            (StatusCode::SERVICE_UNAVAILABLE, "no leader available").into_response()
        }
        KvError::CommitTimeout | KvError::ReadTimeout => (
            StatusCode::SERVICE_UNAVAILABLE,
            "request timed out: cluster is busy",
        )
            .into_response(),
        err => {
            tracing::error!(error = %err, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
