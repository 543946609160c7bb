use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId};
use opentelemetry::{Key, Value};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::testing::trace::{InMemorySpanExporter, InMemorySpanExporterBuilder};
use opentelemetry_sdk::trace::{Config, Sampler, Tracer, TracerProvider};
use tsu_otel::middleware::Layer;
use tsu_otel::middleware::trace::{
    HTTP_REQUEST_BODY, HTTP_REQUEST_HEADERS, HTTP_RESPONSE_BODY, HTTP_ROUTE, HTTP_SERVER_NAME,
    HTTP_STATUS_CODE, Options, TRACERESPONSE, TraceLayer, Traced,
};
use tsu_otel::{Body, Request, Response, ResponseBuffer, Router, Service};

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

// ── Fixtures ──────────────────────────────────────────────────────────────────

struct Harness {
    provider: TracerProvider,
    exporter: InMemorySpanExporter,
}

impl Harness {
    fn new() -> Self {
        Self::with_sampler(Sampler::AlwaysOn)
    }

    fn with_sampler(sampler: Sampler) -> Self {
        let exporter = InMemorySpanExporterBuilder::new().build();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_config(Config::default().with_sampler(sampler))
            .build();
        Self { provider, exporter }
    }

    fn options(&self) -> Options<TracerProvider> {
        Options::new()
            .tracer_provider(self.provider.clone())
            .propagator(TraceContextPropagator::new())
            .metadata_only(false)
    }

    fn spans(&self) -> Vec<SpanData> {
        self.provider.force_flush();
        self.exporter.get_finished_spans().unwrap()
    }

    fn only_span(&self) -> SpanData {
        let mut spans = self.spans();
        assert_eq!(spans.len(), 1, "expected exactly one span, got {spans:?}");
        spans.remove(0)
    }
}

fn attr(span: &SpanData, key: &Key) -> Option<Value> {
    span.attributes.iter().find(|kv| &kv.key == key).map(|kv| kv.value.clone())
}

fn get(path: &str) -> Request {
    Request::new(http::Request::builder().uri(path).body(Body::empty()).unwrap())
}

fn post(path: &str, body: &'static str) -> Request {
    Request::new(http::Request::builder().method("POST").uri(path).body(Body::from(body)).unwrap())
}

async fn call<S: Service>(service: &S, req: Request) -> ResponseBuffer {
    let mut buf = ResponseBuffer::new();
    service.call(req, &mut buf).await;
    buf
}

async fn user(req: Request) -> String {
    format!("user {}", req.param("id").unwrap_or("?"))
}

async fn echo(mut req: Request) -> Response {
    Response::json(req.bytes().await.unwrap_or_default())
}

async fn missing(_req: Request) -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

async fn healthz(_req: Request) -> &'static str {
    "ok"
}

async fn boom(_req: Request) -> &'static str {
    panic!("handler blew up")
}

async fn slow(_req: Request) -> &'static str {
    tokio::time::sleep(Duration::from_secs(10)).await;
    "too late"
}

fn router() -> Router {
    Router::new()
        .get("/users/{id}", user)
        .post("/echo", echo)
        .get("/missing/{id}", missing)
        .get("/healthz", healthz)
        .get("/boom", boom)
        .get("/slow", slow)
}

fn traced(options: Options<TracerProvider>) -> Traced<Arc<Router>, Tracer> {
    let router = Arc::new(router());
    TraceLayer::new("users-api", options.routes(Arc::clone(&router))).layer(router)
}

// ── Naming ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn route_table_names_the_span_up_front() {
    let h = Harness::new();
    let app = traced(h.options().method_in_span_name(true));

    let buf = call(&app, get("/users/42")).await;

    assert_eq!(buf.body(), b"user 42");
    let span = h.only_span();
    assert_eq!(span.name, "GET /users/{id}");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(attr(&span, &HTTP_ROUTE), Some("/users/{id}".into()));
    assert_eq!(attr(&span, &HTTP_SERVER_NAME), Some("users-api".into()));
    assert_eq!(attr(&span, &HTTP_STATUS_CODE), Some(200_i64.into()));
    assert_eq!(span.status, Status::Ok);
}

#[tokio::test]
async fn without_route_table_the_router_names_the_span_afterwards() {
    let h = Harness::new();
    let app = TraceLayer::new("users-api", h.options()).layer(router());

    call(&app, get("/users/7")).await;

    let span = h.only_span();
    assert_eq!(span.name, "/users/{id}");
    assert_eq!(attr(&span, &HTTP_ROUTE), Some("/users/{id}".into()));
}

#[tokio::test]
async fn unmatched_path_gets_an_empty_route() {
    let h = Harness::new();
    let app = TraceLayer::new("", h.options().method_in_span_name(true)).layer(router());

    let buf = call(&app, get("/nowhere")).await;

    assert_eq!(buf.status(), Some(StatusCode::NOT_FOUND));
    let span = h.only_span();
    assert_eq!(span.name, "");
    assert_eq!(attr(&span, &HTTP_ROUTE), Some("".into()));
    assert_eq!(attr(&span, &HTTP_SERVER_NAME), None);
}

// ── Status and bodies ─────────────────────────────────────────────────────────

#[tokio::test]
async fn client_errors_mark_the_span_as_failed() {
    let h = Harness::new();
    let app = traced(h.options());

    let buf = call(&app, get("/missing/1")).await;

    assert_eq!(buf.status(), Some(StatusCode::NOT_FOUND));
    let span = h.only_span();
    assert_eq!(attr(&span, &HTTP_STATUS_CODE), Some(404_i64.into()));
    assert_eq!(span.status, Status::error(""));
    assert_eq!(attr(&span, &HTTP_RESPONSE_BODY), Some("not found".into()));
}

#[tokio::test]
async fn request_and_response_bodies_are_captured() {
    let h = Harness::new();
    let app = traced(h.options());

    let buf = call(&app, post("/echo", r#"{"name":"alice"}"#)).await;

    assert_eq!(buf.body(), br#"{"name":"alice"}"#);
    let span = h.only_span();
    assert_eq!(attr(&span, &HTTP_REQUEST_BODY), Some(r#"{"name":"alice"}"#.into()));
    assert_eq!(attr(&span, &HTTP_RESPONSE_BODY), Some(r#"{"name":"alice"}"#.into()));
}

#[tokio::test]
async fn request_headers_are_serialized_as_json() {
    let h = Harness::new();
    let app = traced(h.options());
    let mut req = get("/users/1");
    req.headers_mut().insert("x-request-id", "abc".parse().unwrap());

    call(&app, req).await;

    let span = h.only_span();
    let headers = attr(&span, &HTTP_REQUEST_HEADERS).unwrap().as_str().into_owned();
    assert!(headers.contains(r#""X-Request-Id":["abc"]"#), "{headers}");
}

#[tokio::test]
async fn metadata_only_drops_headers_and_bodies() {
    let h = Harness::new();
    let app = traced(h.options().metadata_only(true));

    let buf = call(&app, post("/echo", "secret")).await;

    assert_eq!(buf.body(), b"secret");
    let span = h.only_span();
    assert_eq!(attr(&span, &HTTP_STATUS_CODE), Some(200_i64.into()));
    for key in [&HTTP_REQUEST_HEADERS, &HTTP_REQUEST_BODY, &HTTP_RESPONSE_BODY] {
        assert_eq!(attr(&span, key), None, "{key:?} should be absent");
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn filtered_requests_are_not_traced() {
    let h = Harness::new();
    let app = traced(h.options().filter(|req: &Request| req.path() != "/healthz"));

    let buf = call(&app, get("/healthz")).await;

    assert_eq!(buf.body(), b"ok");
    assert!(buf.headers().get(TRACERESPONSE).is_none());
    assert!(h.spans().is_empty());
}

// ── Propagation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn traceresponse_header_identifies_the_server_span() {
    let h = Harness::new();
    let app = traced(h.options());

    let buf = call(&app, get("/users/1")).await;

    let span = h.only_span();
    let expected = format!(
        "00-{}-{}-01",
        span.span_context.trace_id(),
        span.span_context.span_id()
    );
    assert_eq!(buf.headers()[TRACERESPONSE], expected.as_str());
}

#[tokio::test]
async fn inbound_traceparent_becomes_the_parent() {
    let h = Harness::new();
    let app = traced(h.options());
    let mut req = get("/users/1");
    req.headers_mut().insert("traceparent", TRACEPARENT.parse().unwrap());

    call(&app, req).await;

    let span = h.only_span();
    assert_eq!(
        span.span_context.trace_id(),
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
    );
    assert_eq!(span.parent_span_id, SpanId::from_hex("00f067aa0ba902b7").unwrap());
}

#[tokio::test]
async fn unsampled_requests_get_no_traceresponse() {
    let h = Harness::with_sampler(Sampler::AlwaysOff);
    let app = traced(h.options());

    let buf = call(&app, get("/users/1")).await;

    assert_eq!(buf.body(), b"user 1");
    assert!(buf.headers().get(TRACERESPONSE).is_none());
    assert!(h.spans().is_empty());
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn span_ends_when_the_handler_panics() {
    let h = Harness::new();
    let app = Arc::new(traced(h.options()));

    let task = tokio::spawn({
        let app = Arc::clone(&app);
        async move {
            call(&*app, get("/boom")).await;
        }
    });

    assert!(task.await.unwrap_err().is_panic());
    let span = h.only_span();
    assert_eq!(span.name, "/boom");
    assert_eq!(attr(&span, &HTTP_STATUS_CODE), None);
}

#[tokio::test]
async fn span_ends_and_recorder_returns_when_the_request_is_cancelled() {
    let h = Harness::new();
    let router = Arc::new(router());
    let layer = TraceLayer::new("users-api", h.options().routes(Arc::clone(&router)));
    let app = Arc::new(layer.layer(router));
    assert_eq!(layer.recorder_pool().idle(), 0);

    let task = tokio::spawn({
        let app = Arc::clone(&app);
        async move {
            call(&*app, get("/slow")).await;
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();

    assert!(task.await.unwrap_err().is_cancelled());
    let span = h.only_span();
    assert_eq!(span.name, "/slow");
    assert_eq!(attr(&span, &HTTP_STATUS_CODE), None);
    assert_eq!(layer.recorder_pool().idle(), 1);
}

#[tokio::test]
async fn concurrent_requests_get_their_own_spans() {
    let h = Harness::new();
    let app = Arc::new(traced(h.options()));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { call(&*app, get(&format!("/users/{i}"))).await })
        })
        .collect();
    for (i, task) in tasks.into_iter().enumerate() {
        let buf = task.await.unwrap();
        assert_eq!(buf.body(), format!("user {i}").as_bytes());
    }

    let spans = h.spans();
    assert_eq!(spans.len(), 16);
    assert!(spans.iter().all(|s| attr(s, &HTTP_RESPONSE_BODY).is_some()));
}
