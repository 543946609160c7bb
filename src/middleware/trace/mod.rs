//! OpenTelemetry server spans for every request.
//!
//! [`TraceLayer`] wraps a service so that each request gets one server span:
//!
//! 1. trace context is extracted from the request headers;
//! 2. if a route table was supplied, the route pattern is resolved up front
//!    and names the span;
//! 3. the span starts with the network, end-user and HTTP attributes known at
//!    that point, and a `traceresponse` header is added if it records;
//! 4. the request body is observed and the response writer recorded while
//!    the inner service runs;
//! 5. the route is read back from the router if it was not known up front,
//!    status code and span status are set, and (outside metadata-only mode)
//!    request headers, request body and response body are attached.
//!
//! The span ends on every exit path, including panics and cancellation.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsu_otel::middleware::Layer;
//! use tsu_otel::middleware::trace::{Options, TraceLayer};
//! use tsu_otel::{Request, Router, Server};
//!
//! # async fn run() -> Result<(), tsu_otel::Error> {
//! let router = Arc::new(Router::new().get("/users/{id}", get_user));
//! let options = Options::new()
//!     .routes(Arc::clone(&router))
//!     .method_in_span_name(true)
//!     .filter(|req: &Request| req.path() != "/healthz");
//!
//! let app = TraceLayer::new("users-api", options).layer(router);
//! Server::bind("0.0.0.0:3000")?.serve(app).await
//! # }
//! # async fn get_user(_req: Request) -> &'static str { "alice" }
//! ```

mod observer;
mod recorder;
mod semconv;
mod span;

use std::sync::Arc;

use http::StatusCode;
use http::header::HeaderName;
use opentelemetry::global::{self, GlobalTracerProvider};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, KeyValue};
use tracing::{debug, trace};

use crate::handler::{BoxFuture, Service};
use crate::middleware::Layer;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::router::{RouteContext, Routes};

pub use observer::{BodyCapture, ObservedBody, observe};
pub use recorder::{DEFAULT_MAX_IDLE, MAX_RETAINED_BODY, Recorder, RecorderPool};
pub use semconv::*;
pub use span::{TRACERESPONSE, request_headers_json, span_name, status_from_http, traceresponse};

/// Instrumentation scope name reported on every span.
pub const TRACER_NAME: &str = env!("CARGO_PKG_NAME");

/// Environment variable that turns on metadata-only mode when set to `"true"`.
pub const METADATA_ONLY_ENV: &str = "HS_METADATA_ONLY";

type Filter = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
type Propagator = Arc<dyn TextMapPropagator + Send + Sync>;

/// Reads [`METADATA_ONLY_ENV`].
pub fn metadata_only_from_env() -> bool {
    std::env::var(METADATA_ONLY_ENV).is_ok_and(|v| v == "true")
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Configuration for [`TraceLayer`].
///
/// Everything is optional. By default spans come from the global tracer
/// provider, context is decoded by the global propagator, span names are
/// resolved after handling, and metadata-only mode follows
/// [`METADATA_ONLY_ENV`].
pub struct Options<P = GlobalTracerProvider> {
    tracer_provider: P,
    propagator: Option<Propagator>,
    routes: Option<Arc<dyn Routes>>,
    method_in_span_name: bool,
    filter: Option<Filter>,
    metadata_only: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self {
            tracer_provider: global::tracer_provider(),
            propagator: None,
            routes: None,
            method_in_span_name: false,
            filter: None,
            metadata_only: None,
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Options<P> {
    /// Take spans from `provider` instead of the global one.
    pub fn tracer_provider<Q: TracerProvider>(self, provider: Q) -> Options<Q> {
        Options {
            tracer_provider: provider,
            propagator: self.propagator,
            routes: self.routes,
            method_in_span_name: self.method_in_span_name,
            filter: self.filter,
            metadata_only: self.metadata_only,
        }
    }

    /// Decode inbound context with `propagator` instead of the global one.
    pub fn propagator<T>(mut self, propagator: T) -> Self
    where
        T: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Some(Arc::new(propagator));
        self
    }

    /// Resolve route patterns before the handler runs, so the span is
    /// named from the start.
    ///
    /// Pass the same router the layer wraps. Routes registered on a
    /// different table than the one serving requests will name spans after
    /// the wrong pattern.
    pub fn routes<R: Routes + 'static>(mut self, routes: Arc<R>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Name spans `"GET /users/{id}"` rather than `"/users/{id}"`.
    pub fn method_in_span_name(mut self, enabled: bool) -> Self {
        self.method_in_span_name = enabled;
        self
    }

    /// Requests for which `filter` returns `false` are passed through
    /// untraced.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Override the [`METADATA_ONLY_ENV`] setting.
    pub fn metadata_only(mut self, enabled: bool) -> Self {
        self.metadata_only = Some(enabled);
        self
    }
}

// ── TraceLayer ────────────────────────────────────────────────────────────────

struct Shared<T> {
    server_name: String,
    tracer: T,
    propagator: Option<Propagator>,
    routes: Option<Arc<dyn Routes>>,
    method_in_span_name: bool,
    filter: Option<Filter>,
    metadata_only: bool,
    pool: RecorderPool,
}

/// Wraps services in [`Traced`].
///
/// All services produced by one layer share its tracer and recorder pool.
pub struct TraceLayer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TraceLayer<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> TraceLayer<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    /// `server_name` names the (virtual) server handling the requests and is
    /// reported as `http.server_name`.
    pub fn new<P>(server_name: impl Into<String>, options: Options<P>) -> Self
    where
        P: TracerProvider<Tracer = T>,
    {
        let metadata_only = options.metadata_only.unwrap_or_else(metadata_only_from_env);
        let shared = Shared {
            server_name: server_name.into(),
            tracer: options.tracer_provider.tracer(TRACER_NAME),
            propagator: options.propagator,
            routes: options.routes,
            method_in_span_name: options.method_in_span_name,
            filter: options.filter,
            metadata_only,
            pool: RecorderPool::new(),
        };
        Self { shared: Arc::new(shared) }
    }

    /// Whether headers and bodies are left off the spans.
    pub fn metadata_only(&self) -> bool {
        self.shared.metadata_only
    }

    /// The recorder pool shared by every service this layer builds.
    pub fn recorder_pool(&self) -> &RecorderPool {
        &self.shared.pool
    }
}

impl<S, T> Layer<S> for TraceLayer<T>
where
    S: Service,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    type Service = Traced<S, T>;

    fn layer(&self, inner: S) -> Traced<S, T> {
        Traced { inner, shared: Arc::clone(&self.shared) }
    }
}

// ── Traced ────────────────────────────────────────────────────────────────────

/// A service that opens a server span around `S`.
pub struct Traced<S, T> {
    inner: S,
    shared: Arc<Shared<T>>,
}

impl<S, T> Service for Traced<S, T>
where
    S: Service,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        if let Some(filter) = &self.shared.filter {
            if !filter(&req) {
                trace!(path = req.path(), "request filtered out of tracing");
                return self.inner.call(req, w);
            }
        }
        Box::pin(self.traced(req, w))
    }
}

impl<S, T> Traced<S, T>
where
    S: Service,
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    async fn traced(&self, mut req: Request, w: &mut dyn ResponseWriter) {
        let shared = &*self.shared;
        let metadata_only = shared.metadata_only;

        let base = req.extensions().get::<Context>().cloned().unwrap_or_else(Context::current);
        let parent = span::extract(shared.propagator.as_deref(), &base, req.headers());

        let mut route = String::new();
        let mut name = String::new();
        if let Some(routes) = &shared.routes {
            if let Some(pattern) = routes.match_route(req.method(), req.path()) {
                name = span_name(shared.method_in_span_name, req.method(), &pattern);
                route = pattern;
            }
        }

        let request_body = observe(&mut req, metadata_only);

        let builder = shared.tracer
            .span_builder(name)
            .with_kind(SpanKind::Server)
            .with_attributes(semconv::server_attributes(&shared.server_name, &route, &req));
        let cx = parent.with_span(shared.tracer.build_with_context(builder, &parent));
        let _end = span::EndOnDrop(cx.clone());

        let mut recorder = shared.pool.acquire(w, metadata_only);

        if cx.span().is_recording() {
            if let Some(value) = traceresponse(cx.span().span_context()) {
                recorder.headers_mut().append(HeaderName::from_static(TRACERESPONSE), value);
            }
        }

        let route_cx = RouteContext::attach(&mut req);
        let method = req.method().clone();
        let headers = (!metadata_only).then(|| req.headers().clone());
        req.extensions_mut().insert(cx.clone());

        self.inner.call(req, &mut recorder).await;

        let span = cx.span();
        if route.is_empty() {
            route = route_cx.pattern().unwrap_or_default();
            span.set_attribute(HTTP_ROUTE.string(route.clone()));
            span.update_name(span_name(shared.method_in_span_name, &method, &route));
        }

        let status = recorder.status().unwrap_or(StatusCode::OK).as_u16();
        span.set_attribute(HTTP_STATUS_CODE.i64(i64::from(status)));
        span.set_status(status_from_http(status));

        if let Some(headers) = headers {
            match request_headers_json(&headers) {
                Some(json) => span.set_attribute(KeyValue::new(HTTP_REQUEST_HEADERS, json)),
                None => debug!("request headers not serializable, skipping attribute"),
            }
            if let Some(body) = request_body.map(|c| c.take()).filter(|b| !b.is_empty()) {
                span.set_attribute(HTTP_REQUEST_BODY.string(lossy(body)));
            }
            if !recorder.body().is_empty() {
                span.set_attribute(HTTP_RESPONSE_BODY.string(lossy(recorder.body().to_vec())));
            }
        }

        shared.pool.release(recorder);
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
