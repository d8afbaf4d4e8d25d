use axum::{extract::Request, middleware::Next, response::Response};
use http::StatusCode;

use crate::claims::Claims;

/// Gate for directory-management routes: only an administrator may pass.
pub async fn admin_middleware(request: Request, next: Next) -> Response {
    let allowed = request
        .extensions()
        .get::<Claims>()
        .map(|claims| claims.role == api::response::Role::Admin)
        .unwrap_or(false);

    if allowed {
        next.run(request).await
    } else {
        Response::builder()
            .status(StatusCode::FORBIDDEN)
            .body("".into())
            .unwrap()
    }
}
