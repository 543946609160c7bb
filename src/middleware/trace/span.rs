//! Span naming, status mapping, `traceresponse` and request-header capture,
//! plus the guard that ends the server span.

use std::collections::BTreeMap;

use http::header::HeaderValue;
use http::{HeaderMap, Method};
use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanContext, Status, TraceContextExt};

/// Response header carrying the server span's identity back to the caller.
pub const TRACERESPONSE: &str = "traceresponse";

/// Adapts a `HeaderMap` to the propagation API.
pub(crate) struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Decodes the inbound trace context on top of `base`.
///
/// Uses `propagator` when given, otherwise the globally installed one.
pub(crate) fn extract(
    propagator: Option<&(dyn TextMapPropagator + Send + Sync)>,
    base: &Context,
    headers: &HeaderMap,
) -> Context {
    let carrier = HeaderExtractor(headers);
    match propagator {
        Some(p) => p.extract_with_context(base, &carrier),
        None => opentelemetry::global::get_text_map_propagator(|p| {
            p.extract_with_context(base, &carrier)
        }),
    }
}

/// `"<METHOD> <route>"` when `with_method` is set and the route is known,
/// otherwise the route as-is (possibly empty).
pub fn span_name(with_method: bool, method: &Method, route: &str) -> String {
    if with_method && !route.is_empty() {
        format!("{method} {route}")
    } else {
        route.to_owned()
    }
}

/// Maps an HTTP status code to a span status.
///
/// 4xx and 5xx are errors, codes outside `100..=599` are errors with a
/// message, everything else is `Ok`.
pub fn status_from_http(code: u16) -> Status {
    match code {
        100..=399 => Status::Ok,
        400..=599 => Status::error(""),
        _ => Status::error(format!("Invalid HTTP status code {code}")),
    }
}

/// `00-<trace-id>-<span-id>-01` for a valid span context.
pub fn traceresponse(span_context: &SpanContext) -> Option<HeaderValue> {
    if !span_context.is_valid() {
        return None;
    }
    let value = format!("00-{}-{}-01", span_context.trace_id(), span_context.span_id());
    HeaderValue::from_str(&value).ok()
}

/// Request headers as a JSON object of canonical name → list of values.
///
/// Names are canonicalized (`x-request-id` → `X-Request-Id`); values that are
/// not valid UTF-8 are decoded lossily.
pub fn request_headers_json(headers: &HeaderMap) -> Option<String> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(canonical_name(name.as_str())).or_default().push(value);
    }
    serde_json::to_string(&map).ok()
}

/// Upper-cases the first letter and every letter following a `-`.
fn canonical_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let c = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            c
        })
        .collect()
}

/// Ends the span held by the context when dropped.
///
/// Created right after the span starts, so normal return, panic unwinding and
/// a cancelled request future all close it. Ending twice is a no-op in the
/// SDK, so an explicit `end` elsewhere is harmless.
pub(crate) struct EndOnDrop(pub Context);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.span().end();
    }
}
