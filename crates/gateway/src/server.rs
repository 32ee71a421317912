//! HTTP front end for signed delivery URLs.
//!
//! Routes:
//!
//! - `GET <action>?data=<token>` serves the file the token grants access to.
//! - `GET /health` answers `ok`.
//!
//! Every failed delivery, and every unknown route, gets the same 404 so a
//! client cannot tell a bad token from an expired one or a missing file.

use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use protocol::unix_now;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::delivery::{DeliveredFile, FileDeliveryHandler};
use crate::signing::TOKEN_PARAM;

/// Body of every rejected request.
pub const NOT_FOUND_BODY: &str = "Page not found.";

#[derive(Clone)]
struct AppState {
    handler: Arc<FileDeliveryHandler>,
}

/// Build the router serving deliveries at `action`.
pub fn router(handler: Arc<FileDeliveryHandler>, action: &str) -> Router {
    Router::new()
        .route(action, get(deliver))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { handler })
}

/// Serve `app` on `listener` until Ctrl-C.
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn deliver(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let data = query.as_deref().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
    });

    let handler = state.handler.clone();
    let now = unix_now();
    match tokio::task::spawn_blocking(move || handler.handle(data.as_deref(), now)).await {
        Ok(Ok(file)) => file.into_response(),
        Ok(Err(rejection)) => {
            debug!("Delivery rejected: {}", rejection);
            not_found().await
        }
        Err(e) => {
            warn!("Delivery task failed: {}", e);
            not_found().await
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        NOT_FOUND_BODY,
    )
        .into_response()
}

impl IntoResponse for DeliveredFile {
    fn into_response(self) -> Response {
        let disposition = self.content_disposition();
        let length = self.contents.len().to_string();
        (
            StatusCode::OK,
            [
                (CONTENT_TYPE, self.mime_type),
                (CONTENT_DISPOSITION, disposition),
                (CONTENT_LENGTH, length),
                (X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
            ],
            self.contents,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryAdapter, StorageAdapter, WriteOptions};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use protocol::{AccessTokenCodec, AccessTokenPayload, CipherAlgorithm, NormalizedPath, TokenCipher};
    use serde_json::Map;
    use tower::ServiceExt;

    fn app() -> (Arc<AccessTokenCodec>, Router) {
        let cipher =
            TokenCipher::from_passphrase("unit-secret", None, "fsgate", CipherAlgorithm::default())
                .unwrap();
        let codec = Arc::new(AccessTokenCodec::new(cipher));
        let adapter = Arc::new(MemoryAdapter::new());
        adapter
            .write(&NormalizedPath::new("a.txt"), b"hello", &WriteOptions::default())
            .unwrap();
        let handler = Arc::new(FileDeliveryHandler::new(codec.clone(), adapter));
        (codec, router(handler, "/site/file"))
    }

    async fn get_uri(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (_codec, app) = app();
        let (status, _, body) = get_uri(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_delivery_headers() {
        let (codec, app) = app();
        let token = codec
            .encode(&AccessTokenPayload::public(NormalizedPath::new("a.txt"), Map::new()))
            .unwrap();
        let (status, headers, body) =
            get_uri(app, &format!("/site/file?data={}", token.as_str())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello");
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(headers[CONTENT_DISPOSITION], "inline; filename=\"a.txt\"");
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[tokio::test]
    async fn test_unknown_route_is_uniform_404() {
        let (_codec, app) = app();
        let (status, headers, body) = get_uri(app, "/elsewhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body, NOT_FOUND_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_and_bad_query() {
        let (_codec, app) = app();
        let (status, _, body) = get_uri(app.clone(), "/site/file").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, NOT_FOUND_BODY.as_bytes());

        let (status, _, body) = get_uri(app, "/site/file?data=%zz&x").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, NOT_FOUND_BODY.as_bytes());
    }
}
