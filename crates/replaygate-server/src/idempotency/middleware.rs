//! Interception pipeline.
//!
//! validate token → hash body prefix → cache lookup → [hit: replay]
//! | [miss: lock → re-check → execute → capture → conditional store → release].

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_TYPE, ETAG},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;

use super::{
    IDEMPOTENCY_CACHE_HEADER, IdempotencyEngine,
    error::{IdempotencyError, TokenError},
    hasher::hash_body_prefix,
    key::{CacheKey, IdempotencyToken},
    store::ResponseSnapshot,
};
use crate::metrics;

/// axum middleware entry point, mounted with `from_fn_with_state`.
pub async fn idempotency_middleware(
    State(engine): State<Arc<IdempotencyEngine>>,
    req: Request,
    next: Next,
) -> Response {
    match engine.intercept(req, next).await {
        Ok(response) => response,
        Err(err) => {
            metrics::record_idempotency_outcome(err.outcome());
            match &err {
                IdempotencyError::Downstream(_) => {
                    tracing::warn!(error = %err, "idempotent request failed")
                }
                _ => tracing::debug!(error = %err, "idempotent request rejected"),
            }
            err.into_response()
        }
    }
}

impl IdempotencyEngine {
    /// Runs one request through the pipeline.
    ///
    /// Downstream responses are returned unchanged apart from the
    /// `Idempotency-Cache` header, whatever their status.
    pub async fn intercept(&self, req: Request, next: Next) -> Result<Response, IdempotencyError> {
        let options = self.options();

        if !options.applies_to(req.method()) {
            return Ok(next.run(req).await);
        }

        let token = match req.headers().get(&options.header_name) {
            Some(raw) => Some(parse_token(raw, options.max_key_length)?),
            None => None,
        };
        let Some(token) = token else {
            return Ok(next.run(req).await);
        };

        if !is_json_content(req.headers()) {
            tracing::debug!(%token, "non-JSON body, skipping idempotency");
            return Ok(next.run(req).await);
        }

        let (parts, body) = req.into_parts();
        let hashed = hash_body_prefix(body, options.hash_budget_bytes)
            .await
            .map_err(IdempotencyError::RequestBody)?;
        let key = CacheKey::new(parts.uri.path(), &token, &hashed.digest);
        let req = Request::from_parts(parts, hashed.body);

        if let Some(entry) = self.cache().get(&key) {
            tracing::debug!(%key, "idempotency cache hit");
            metrics::record_idempotency_outcome("hit");
            return Ok(replay(entry.snapshot));
        }

        let cancel = req
            .extensions()
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();

        tracing::debug!(%key, "waiting for idempotency lock");
        let guard = self
            .locks()
            .acquire(&key, &cancel)
            .await
            .map_err(|_| IdempotencyError::Cancelled)?;

        // A duplicate may have finished while we waited.
        if let Some(entry) = self.cache().get(&key) {
            guard.release();
            tracing::debug!(%key, "idempotency cache hit after lock wait");
            metrics::record_idempotency_outcome("hit");
            return Ok(replay(entry.snapshot));
        }

        tracing::debug!(%key, "idempotency cache miss, executing");
        metrics::record_idempotency_outcome("miss");

        let response = next.run(req).await;
        let (mut parts, body) = response.into_parts();
        let payload = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(IdempotencyError::Downstream)?;

        // Deadline passed or caller gone while the executor ran.
        if cancel.is_cancelled() {
            guard.release();
            tracing::debug!(%key, status = %parts.status, "request cancelled during execution, not caching");
            return Err(IdempotencyError::Cancelled);
        }

        if !parts.status.is_success() {
            tracing::debug!(%key, status = %parts.status, "not caching unsuccessful response");
            metrics::record_idempotency_outcome("not_cached");
        } else if payload.len() > options.max_cacheable_bytes {
            tracing::debug!(
                %key,
                size = payload.len(),
                limit = options.max_cacheable_bytes,
                "response too large to cache"
            );
            metrics::record_idempotency_outcome("oversize");
        } else {
            let snapshot = ResponseSnapshot {
                status: parts.status,
                body: payload.clone(),
                etag: parts.headers.get(ETAG).cloned(),
            };
            self.cache().put(key.clone(), snapshot, options.cache_ttl);
            metrics::record_idempotency_outcome("stored");
            metrics::set_idempotency_cache_entries(self.cache().len());
            tracing::debug!(%key, status = %parts.status, "idempotent response stored");
        }

        guard.release();

        parts
            .headers
            .insert(IDEMPOTENCY_CACHE_HEADER.clone(), HeaderValue::from_static("miss"));
        Ok(Response::from_parts(parts, Body::from(payload)))
    }
}

fn parse_token(raw: &HeaderValue, max_len: usize) -> Result<IdempotencyToken, TokenError> {
    let raw = raw.to_str().map_err(|_| TokenError::Format)?;
    IdempotencyToken::parse(raw, max_len)
}

/// `application/json` or any `application/*+json`, parameters ignored.
pub(crate) fn is_json_content(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json"
        || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn replay(snapshot: ResponseSnapshot) -> Response {
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = snapshot.status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(etag) = snapshot.etag {
        headers.insert(ETAG, etag);
    }
    headers.insert(IDEMPOTENCY_CACHE_HEADER.clone(), HeaderValue::from_static("hit"));
    response
}
