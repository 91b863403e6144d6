use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::backend::Backend;

pub mod handlers;

/// Shared state handed to every handler.
pub struct AppState {
    pub backend: Backend,
}

/// Build the host-facing router.
///
/// Logical backend paths are served under `/v1/`; leases are renewed and
/// revoked through `/leases/*` with the secret returned at issuance.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/v1/*path",
            get(handlers::read_path)
                .post(handlers::write_path)
                .put(handlers::write_path)
                .delete(handlers::delete_path),
        )
        .route("/leases/renew", post(handlers::renew_lease))
        .route("/leases/revoke", post(handlers::revoke_lease))
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Injects a unique `x-request-id` into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
