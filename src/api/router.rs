use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::api::error::ApiError;
use crate::api::{auth, download, search, ui};
use crate::AppState;

/// Simple request logger middleware
async fn log_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    tracing::info!(">>> {} {}", method, uri);
    let res = next.run(req).await;
    tracing::info!("<<< {} {} -> {}", method, uri, res.status());
    res
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

/// Build the UI + JSON API router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth-status", get(auth::auth_status))
        .route("/auth", post(auth::authenticate))
        .route("/search", post(search::search))
        .route("/download-attachment", post(download::download_attachment));

    Router::new()
        .route("/", get(ui::index))
        .route("/app.js", get(ui::app_js))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn(log_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}
