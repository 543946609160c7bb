//! # tsu-otel
//!
//! OpenTelemetry server instrumentation for a small hyper-based HTTP stack.
//!
//! Every request that goes through [`TraceLayer`](middleware::trace::TraceLayer)
//! gets one server span carrying the network, end-user and HTTP semantic
//! attributes, the matched route pattern, the response status, and (unless
//! metadata-only mode is on) the request headers, request body and response
//! body.
//!
//! ## The pieces
//!
//! - [`Router`]: radix-tree routing via [`matchit`], one tree per method.
//!   It also reports which pattern a request would hit ([`Routes`]) and which
//!   one it did hit ([`RouteContext`]).
//! - [`Service`] / [`ResponseWriter`]: every layer receives the request by
//!   value and a borrowed sink to write the response into.
//! - [`middleware::trace`]: the tracing layer itself.
//! - [`Server`]: hyper accept loop with graceful shutdown.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use http::StatusCode;
//! use tsu_otel::middleware::Layer;
//! use tsu_otel::middleware::trace::{Options, TraceLayer};
//! use tsu_otel::{Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tsu_otel::Error> {
//!     let router = Arc::new(
//!         Router::new()
//!             .get("/users/{id}", get_user)
//!             .post("/users", create_user),
//!     );
//!
//!     let tracing = TraceLayer::new(
//!         "users-api",
//!         Options::new().routes(Arc::clone(&router)).method_in_span_name(true),
//!     );
//!
//!     Server::bind("0.0.0.0:3000")?.serve(tracing.layer(router)).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(mut req: Request) -> (StatusCode, Response) {
//!     match req.bytes().await {
//!         Ok(body) if !body.is_empty() => (StatusCode::CREATED, Response::json(body)),
//!         _ => (StatusCode::BAD_REQUEST, Response::text("empty body")),
//!     }
//! }
//! ```

mod body;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use body::Body;
pub use error::{BoxError, Error};
pub use handler::{BoxFuture, BoxedHandler, Handler, Service};
pub use request::{RemoteAddr, Request};
pub use response::{ContentType, IntoResponse, Response, ResponseBuffer, ResponseBuilder, ResponseWriter};
pub use router::{RouteContext, Routes, Router};
pub use server::Server;
