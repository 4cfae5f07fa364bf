use super::{
    CleanupQuery, CleanupResponse, ExpandRequest, ResourceQuery, ServerState, response_error,
    storage_error,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use reststore_core::path_codec::leaf_name;
use reststore_core::{
    ListWindow, LockMode, LockRequest, PutResourceOperationRequest, StorageOutcome,
    StructuralConflict,
};
use std::sync::Arc;
use std::time::Duration;

const EXPIRE_AFTER_HEADER: &str = "x-expire-after";
const LOCK_HEADER: &str = "x-lock";
const LOCK_MODE_HEADER: &str = "x-lock-mode";
const LOCK_EXPIRE_AFTER_HEADER: &str = "x-lock-expire-after";
const COMPRESS_HEADER: &str = "x-stored-compressed";

pub(crate) async fn get_resource(
    State(state): State<Arc<ServerState>>,
    raw_path: Option<Path<String>>,
    Query(query): Query<ResourceQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = resource_path(raw_path);
    let window = ListWindow::new(query.offset.unwrap_or(0), query.limit.unwrap_or(-1));
    let etag = if_none_match(&headers);

    let outcome = match state.storage.get(&path, etag, window).await {
        Ok(outcome) => outcome,
        Err(error) => return storage_error(&path, error),
    };

    match outcome {
        StorageOutcome::Resource(resource) => (
            StatusCode::OK,
            [
                (header::ETAG, resource.etag),
                (header::CONTENT_TYPE, "application/json".to_string()),
            ],
            resource.content,
        )
            .into_response(),
        StorageOutcome::Collection(entries) => {
            let names: Vec<String> = entries.iter().map(|entry| entry.display_name()).collect();
            let mut body = serde_json::Map::new();
            body.insert(
                collection_name(&path),
                serde_json::Value::Array(names.into_iter().map(serde_json::Value::String).collect()),
            );
            (StatusCode::OK, Json(serde_json::Value::Object(body))).into_response()
        }
        StorageOutcome::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        StorageOutcome::NotFound => response_error(StatusCode::NOT_FOUND, "resource not found"),
        StorageOutcome::CompressionError(message) => {
            tracing::warn!("Failed to decompress resource. path={} error={}", path, message);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
        other => unexpected(&path, other),
    }
}

pub(crate) async fn put_resource(
    State(state): State<Arc<ServerState>>,
    raw_path: Option<Path<String>>,
    Query(query): Query<ResourceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = resource_path(raw_path);
    let request = match put_request(&path, &headers, query.merge, body) {
        Ok(request) => request,
        Err(message) => return response_error(StatusCode::BAD_REQUEST, message),
    };

    let outcome = match state.storage.put(request).await {
        Ok(outcome) => outcome,
        Err(error) => return storage_error(&path, error),
    };

    match outcome {
        StorageOutcome::Stored { etag } => {
            (StatusCode::OK, [(header::ETAG, etag)]).into_response()
        }
        StorageOutcome::LockIgnored => StatusCode::OK.into_response(),
        StorageOutcome::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        StorageOutcome::Conflict(conflict) => {
            let message = match conflict {
                StructuralConflict::ExistingCollection => {
                    "a collection already exists at this path".to_string()
                }
                StructuralConflict::ExistingResource(ancestor) => {
                    format!("the ancestor {} is a resource", ancestor)
                }
            };
            let mut response = response_error(StatusCode::METHOD_NOT_ALLOWED, message);
            response.headers_mut().insert(
                header::ALLOW,
                header::HeaderValue::from_static("GET, DELETE"),
            );
            response
        }
        StorageOutcome::LockConflict => {
            response_error(StatusCode::CONFLICT, "resource is locked by another owner")
        }
        StorageOutcome::Invalid(message) => response_error(StatusCode::BAD_REQUEST, message),
        other => unexpected(&path, other),
    }
}

pub(crate) async fn delete_resource(
    State(state): State<Arc<ServerState>>,
    raw_path: Option<Path<String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = resource_path(raw_path);
    let lock = match lock_request(&headers) {
        Ok(lock) => lock,
        Err(message) => return response_error(StatusCode::BAD_REQUEST, message),
    };

    let outcome = match state.storage.delete(&path, lock).await {
        Ok(outcome) => outcome,
        Err(error) => return storage_error(&path, error),
    };

    match outcome {
        StorageOutcome::Deleted | StorageOutcome::LockIgnored => StatusCode::OK.into_response(),
        StorageOutcome::NotFound => response_error(StatusCode::NOT_FOUND, "resource not found"),
        StorageOutcome::LockConflict => {
            response_error(StatusCode::CONFLICT, "resource is locked by another owner")
        }
        other => unexpected(&path, other),
    }
}

pub(crate) async fn post_resource(
    State(state): State<Arc<ServerState>>,
    raw_path: Option<Path<String>>,
    Query(query): Query<ResourceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let path = resource_path(raw_path);
    if !query.storage_expand {
        return response_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "POST is only supported with storageExpand=true",
        );
    }

    let expand: ExpandRequest = match serde_json::from_slice(&body) {
        Ok(expand) => expand,
        Err(error) => {
            return response_error(
                StatusCode::BAD_REQUEST,
                format!("invalid expand body: {}", error),
            );
        }
    };

    let etag = if_none_match(&headers);
    let outcome = match state.storage.expand(&path, etag, expand.sub_resources).await {
        Ok(outcome) => outcome,
        Err(error) => return storage_error(&path, error),
    };

    match outcome {
        StorageOutcome::Expanded { payload, etag } => {
            let payload: serde_json::Value = match serde_json::from_slice(&payload) {
                Ok(payload) => payload,
                Err(error) => {
                    return response_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string());
                }
            };
            let mut body = serde_json::Map::new();
            body.insert(collection_name(&path), payload);
            (
                StatusCode::OK,
                [(header::ETAG, etag)],
                Json(serde_json::Value::Object(body)),
            )
                .into_response()
        }
        StorageOutcome::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        StorageOutcome::NotFound => response_error(StatusCode::NOT_FOUND, "nothing to expand"),
        StorageOutcome::Invalid(message) => response_error(StatusCode::BAD_REQUEST, message),
        StorageOutcome::CompressionNotSupported => response_error(
            StatusCode::BAD_REQUEST,
            "collections holding compressed resources cannot be expanded",
        ),
        other => unexpected(&path, other),
    }
}

pub(crate) async fn cleanup_resources(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CleanupQuery>,
) -> impl IntoResponse {
    let outcome = match state.storage.cleanup(query.cleanup_resources_amount).await {
        Ok(outcome) => outcome,
        Err(error) => return storage_error("_cleanup", error),
    };

    match outcome {
        StorageOutcome::Cleaned(report) => {
            tracing::info!(
                "Cleanup finished. cleaned={} remaining={}",
                report.cleaned,
                report.remaining
            );
            (
                StatusCode::OK,
                Json(CleanupResponse {
                    cleaned_resources: report.cleaned,
                    expired_resources_left: report.remaining,
                }),
            )
                .into_response()
        }
        other => unexpected("_cleanup", other),
    }
}

fn resource_path(raw_path: Option<Path<String>>) -> String {
    match raw_path {
        Some(Path(path)) => format!("/{}", path),
        None => "/".to_string(),
    }
}

fn collection_name(path: &str) -> String {
    leaf_name(path).unwrap_or_default().to_string()
}

fn unexpected(path: &str, outcome: StorageOutcome) -> Response {
    tracing::error!("Unexpected storage outcome. path={} outcome={:?}", path, outcome);
    response_error(StatusCode::INTERNAL_SERVER_ERROR, "unexpected storage outcome")
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn if_none_match(headers: &HeaderMap) -> Option<String> {
    header_value(headers, header::IF_NONE_MATCH.as_str())
        .map(|value| value.trim_matches('"').to_string())
}

fn seconds_header(headers: &HeaderMap, name: &str) -> std::result::Result<Option<Duration>, String> {
    match header_value(headers, name) {
        Some(value) => value
            .parse::<u64>()
            .map(|seconds| Some(Duration::from_secs(seconds)))
            .map_err(|_| format!("invalid {} header '{}': expected seconds", name, value)),
        None => Ok(None),
    }
}

fn lock_request(headers: &HeaderMap) -> std::result::Result<Option<LockRequest>, String> {
    let Some(owner) = header_value(headers, LOCK_HEADER) else {
        return Ok(None);
    };
    let mode = match header_value(headers, LOCK_MODE_HEADER) {
        Some(mode) => mode.parse::<LockMode>().map_err(|error| error.to_string())?,
        None => LockMode::default(),
    };

    let mut request = LockRequest::new(owner, mode);
    if let Some(ttl) = seconds_header(headers, LOCK_EXPIRE_AFTER_HEADER)? {
        request = request.expire_after(ttl);
    }
    Ok(Some(request))
}

fn put_request(
    path: &str,
    headers: &HeaderMap,
    merge: bool,
    body: Bytes,
) -> std::result::Result<PutResourceOperationRequest, String> {
    let mut request = PutResourceOperationRequest::new(path, body);
    request.merge = merge;
    request.etag = if_none_match(headers);
    request.expire_after = seconds_header(headers, EXPIRE_AFTER_HEADER)?;
    request.compress = header_value(headers, COMPRESS_HEADER)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    request.lock = lock_request(headers)?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn put_request_reads_every_header() {
        let headers = headers(&[
            ("if-none-match", "\"v7\""),
            ("x-expire-after", "30"),
            ("x-stored-compressed", "TRUE"),
            ("x-lock", "alice"),
            ("x-lock-mode", "reject"),
            ("x-lock-expire-after", "5"),
        ]);
        let request = put_request("/a/b", &headers, false, Bytes::from_static(b"{}")).unwrap();

        assert_eq!(request.path, "/a/b");
        assert_eq!(request.etag.as_deref(), Some("v7"));
        assert_eq!(request.expire_after, Some(Duration::from_secs(30)));
        assert!(request.compress);
        assert_eq!(
            request.lock,
            Some(LockRequest::new("alice", LockMode::Reject).expire_after(Duration::from_secs(5)))
        );
    }

    #[test]
    fn put_ignores_an_etag_request_header() {
        let request = put_request(
            "/a",
            &headers(&[("etag", "\"v7\"")]),
            false,
            Bytes::from_static(b"{}"),
        )
        .unwrap();

        assert_eq!(request.etag, None);
    }

    #[test]
    fn missing_headers_mean_plain_write() {
        let request = put_request("/a", &HeaderMap::new(), true, Bytes::new()).unwrap();

        assert!(request.merge);
        assert_eq!(request.etag, None);
        assert_eq!(request.expire_after, None);
        assert!(!request.compress);
        assert_eq!(request.lock, None);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let bad_expiry = headers(&[("x-expire-after", "soon")]);
        assert!(put_request("/a", &bad_expiry, false, Bytes::new()).is_err());

        let bad_mode = headers(&[("x-lock", "alice"), ("x-lock-mode", "exclusive")]);
        assert!(lock_request(&bad_mode).is_err());
    }

    #[test]
    fn lock_mode_defaults_to_silent() {
        let lock = lock_request(&headers(&[("x-lock", "bob")])).unwrap().unwrap();
        assert_eq!(lock.mode, LockMode::Silent);
        assert_eq!(lock.expire_after, None);
    }

    #[test]
    fn paths_and_collection_names() {
        assert_eq!(resource_path(None), "/");
        assert_eq!(resource_path(Some(Path("a/b/".to_string()))), "/a/b/");
        assert_eq!(collection_name("/a/b"), "b");
        assert_eq!(collection_name("/"), "");
        assert_eq!(
            if_none_match(&headers(&[("if-none-match", "\"abc\"")])),
            Some("abc".to_string())
        );
    }
}
