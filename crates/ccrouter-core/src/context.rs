use secrecy::SecretString;
use uuid::Uuid;

/// Runtime context for an inbound client request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP request parts (method, URI, headers, extensions)
    pub parts: http::request::Parts,
    /// Bearer token presented by the client, if any
    pub api_key: Option<SecretString>,
    /// Identifier assigned to this request, threaded through pipeline execution
    pub request_id: Uuid,
}

impl RequestContext {
    /// Create a minimal context for embedded (non-HTTP) use, e.g. handshakes
    pub fn empty() -> Self {
        let (parts, _) = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .body(())
            .expect("valid minimal request")
            .into_parts();

        Self {
            parts,
            api_key: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Access request headers
    pub fn headers(&self) -> &http::HeaderMap {
        &self.parts.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_api_key() {
        let ctx = RequestContext::empty();
        assert!(ctx.api_key.is_none());
        assert!(ctx.headers().is_empty());
    }
}
