//! Shared primitives used across the router: request context, HTTP header
//! rule application, and the `HttpError` trait domain errors implement to
//! stay decoupled from the axum layer.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod context;
pub mod error;
pub mod headers;

pub use context::RequestContext;
pub use error::HttpError;
pub use headers::{apply_header_rules, get_deny_list, is_header_denied, HeaderRule};
