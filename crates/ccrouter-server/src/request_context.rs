use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use ccrouter_core::RequestContext;
use uuid::Uuid;

/// Builds a `RequestContext` from the incoming request's parts for downstream handlers
pub async fn request_context_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();

    let api_key = parts
        .headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| secrecy::SecretString::from(token.to_owned()));

    let context = RequestContext {
        parts: parts.clone(),
        api_key,
        request_id: Uuid::new_v4(),
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(context);

    next.run(request).await
}
