use crate::config::Config;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reststore_core::{RestStorage, RestStoreError, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;

mod external;
mod types;

use external::{cleanup_resources, delete_resource, get_resource, post_resource, put_resource};
pub(crate) use types::*;

pub struct ServerState {
    pub(crate) storage: Arc<RestStorage>,
    pub(crate) config: Config,
}

pub async fn run_server(config: Config, storage: RestStorage) -> Result<()> {
    let storage = Arc::new(storage);

    if config.sweeper.enabled {
        let every = Duration::from_secs(config.sweeper.interval_secs);
        storage.sweeper().clone().start(every);
        tracing::info!(
            "Expiration sweeper started interval_secs={}",
            config.sweeper.interval_secs
        );
    }

    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(ServerState { storage, config });
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Reststore listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| RestStoreError::Http(error.to_string()))?;

    Ok(())
}

pub(crate) fn router(state: Arc<ServerState>) -> Router {
    let resources = Router::new()
        .route("/_cleanup", post(cleanup_resources))
        .route(
            "/",
            get(get_resource)
                .put(put_resource)
                .delete(delete_resource)
                .post(post_resource),
        )
        .route(
            "/*path",
            get(get_resource)
                .put(put_resource)
                .delete(delete_resource)
                .post(post_resource),
        );

    let prefix = state.config.route_prefix().to_string();
    let app = if prefix.is_empty() {
        resources
    } else {
        Router::new().nest(&prefix, resources)
    };

    app.with_state(state)
}

pub(crate) fn response_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Backend failures that made it through the storage facade.
pub(crate) fn storage_error(path: &str, error: RestStoreError) -> Response {
    match error {
        RestStoreError::BackendUnavailable(_) => {
            tracing::error!("Backend unavailable. path={} error={}", path, error);
            response_error(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        other => {
            tracing::error!("Storage call failed. path={} error={}", path, other);
            response_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
