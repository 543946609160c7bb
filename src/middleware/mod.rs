//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware is a [`Service`] that owns another
//! service; a [`Layer`] is the factory that builds one around any inner
//! service.
//!
//! Built-in middleware:
//! - [`trace`]: OpenTelemetry server span per request, with route, status,
//!   and optional header/body capture

pub mod trace;

use crate::handler::Service;

/// Wraps an inner service in a middleware service.
pub trait Layer<S> {
    type Service: Service;

    fn layer(&self, inner: S) -> Self::Service;
}
