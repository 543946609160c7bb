//! Traced JSON endpoints.
//!
//! Spans are kept in memory and logged when the server shuts down.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -H 'traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01' \
//!        http://localhost:3000/users/7
//!   curl http://localhost:3000/healthz
//!
//! then Ctrl-C. Set `HS_METADATA_ONLY=true` to leave headers and bodies out.

use std::sync::Arc;

use http::StatusCode;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::testing::trace::InMemorySpanExporterBuilder;
use opentelemetry_sdk::trace::TracerProvider;
use tracing::info;
use tsu_otel::middleware::Layer;
use tsu_otel::middleware::trace::{Options, TraceLayer};
use tsu_otel::{Request, Response, Router, Server};

#[tokio::main]
async fn main() -> Result<(), tsu_otel::Error> {
    tracing_subscriber::fmt::init();

    let exporter = InMemorySpanExporterBuilder::new().build();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    global::set_text_map_propagator(TraceContextPropagator::new());

    let router = Arc::new(
        Router::new()
            .get("/users/{id}", get_user)
            .post("/users", create_user)
            .delete("/users/{id}", delete_user)
            .get("/healthz", healthz),
    );

    let options = Options::new()
        .tracer_provider(provider.clone())
        .routes(Arc::clone(&router))
        .method_in_span_name(true)
        .filter(|req: &Request| req.path() != "/healthz");
    let app = TraceLayer::new("users-api", options).layer(router);

    Server::bind("0.0.0.0:3000")?.serve(app).await?;

    provider.force_flush();
    for span in exporter.get_finished_spans().unwrap_or_default() {
        let attributes: Vec<String> = span.attributes.iter()
            .map(|kv| format!("{}={}", kv.key.as_str(), kv.value))
            .collect();
        info!(
            name = %span.name,
            trace_id = %span.span_context.trace_id(),
            status = ?span.status,
            "{}",
            attributes.join(" "),
        );
    }
    Ok(())
}

async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

async fn create_user(mut req: Request) -> (StatusCode, Response) {
    match req.bytes().await {
        Ok(body) if !body.is_empty() => (StatusCode::CREATED, Response::json(body)),
        _ => (StatusCode::BAD_REQUEST, Response::text("empty body")),
    }
}

async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn healthz(_req: Request) -> &'static str {
    "ok"
}
