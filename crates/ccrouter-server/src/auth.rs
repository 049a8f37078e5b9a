use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};

/// Bearer token clients must present to reach any route behind this middleware
#[derive(Clone)]
pub struct ApiKeyState(pub SecretString);

/// Rejects requests whose `Authorization: Bearer <token>` doesn't match the configured APIKEY
pub async fn bearer_auth_middleware(State(expected): State<ApiKeyState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected.0.expose_secret() => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response(),
    }
}
