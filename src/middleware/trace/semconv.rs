//! Attribute keys and the request-derived attributes known at span start.
//!
//! Keys follow OpenTelemetry semantic conventions v1.4, the generation
//! most HTTP server instrumentations still emit.

use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, USER_AGENT};
use http::{Uri, Version};
use opentelemetry::{Key, KeyValue};

use crate::request::Request;

pub const NET_TRANSPORT: Key = Key::from_static_str("net.transport");
pub const NET_PEER_IP: Key = Key::from_static_str("net.peer.ip");
pub const NET_PEER_PORT: Key = Key::from_static_str("net.peer.port");
pub const NET_HOST_NAME: Key = Key::from_static_str("net.host.name");
pub const NET_HOST_IP: Key = Key::from_static_str("net.host.ip");
pub const NET_HOST_PORT: Key = Key::from_static_str("net.host.port");
pub const ENDUSER_ID: Key = Key::from_static_str("enduser.id");
pub const HTTP_SERVER_NAME: Key = Key::from_static_str("http.server_name");
pub const HTTP_ROUTE: Key = Key::from_static_str("http.route");
pub const HTTP_METHOD: Key = Key::from_static_str("http.method");
pub const HTTP_SCHEME: Key = Key::from_static_str("http.scheme");
pub const HTTP_HOST: Key = Key::from_static_str("http.host");
pub const HTTP_TARGET: Key = Key::from_static_str("http.target");
pub const HTTP_FLAVOR: Key = Key::from_static_str("http.flavor");
pub const HTTP_USER_AGENT: Key = Key::from_static_str("http.user_agent");
pub const HTTP_CLIENT_IP: Key = Key::from_static_str("http.client_ip");
pub const HTTP_REQUEST_CONTENT_LENGTH: Key = Key::from_static_str("http.request_content_length");
pub const HTTP_STATUS_CODE: Key = Key::from_static_str("http.status_code");
pub const HTTP_REQUEST_HEADERS: Key = Key::from_static_str("http.request.headers");
pub const HTTP_REQUEST_BODY: Key = Key::from_static_str("http.request.body");
pub const HTTP_RESPONSE_BODY: Key = Key::from_static_str("http.response.body");

/// Value of `net.transport` for TCP connections.
const IP_TCP: &str = "ip_tcp";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Everything known about a request before the handler runs.
///
/// `route` is left out when empty; the fallback naming path sets it later.
pub fn server_attributes(server_name: &str, route: &str, req: &Request) -> Vec<KeyValue> {
    let mut attributes = Vec::with_capacity(16);
    net_attributes(req, &mut attributes);
    enduser_attributes(req, &mut attributes);
    http_attributes(server_name, route, req, &mut attributes);
    attributes
}

fn net_attributes(req: &Request, out: &mut Vec<KeyValue>) {
    out.push(NET_TRANSPORT.string(IP_TCP));

    if let Some(peer) = req.remote_addr() {
        out.push(NET_PEER_IP.string(peer.ip().to_string()));
        out.push(NET_PEER_PORT.i64(i64::from(peer.port())));
    }

    if let Some((host, port)) = host_of(req).and_then(split_host_port) {
        match host.parse::<IpAddr>() {
            Ok(ip) => out.push(NET_HOST_IP.string(ip.to_string())),
            Err(_) => out.push(NET_HOST_NAME.string(host.to_owned())),
        }
        if let Some(port) = port {
            out.push(NET_HOST_PORT.i64(i64::from(port)));
        }
    }
}

fn enduser_attributes(req: &Request, out: &mut Vec<KeyValue>) {
    if let Some(user) = basic_auth_user(req) {
        out.push(ENDUSER_ID.string(user));
    }
}

fn http_attributes(server_name: &str, route: &str, req: &Request, out: &mut Vec<KeyValue>) {
    if !server_name.is_empty() {
        out.push(HTTP_SERVER_NAME.string(server_name.to_owned()));
    }
    if !route.is_empty() {
        out.push(HTTP_ROUTE.string(route.to_owned()));
    }
    if let Some(ip) = req.header(X_FORWARDED_FOR).and_then(|v| v.split(',').next()) {
        let ip = ip.trim();
        if !ip.is_empty() {
            out.push(HTTP_CLIENT_IP.string(ip.to_owned()));
        }
    }

    out.push(HTTP_METHOD.string(req.method().as_str().to_owned()));
    out.push(HTTP_SCHEME.string(scheme(req.uri())));
    if let Some(host) = host_of(req) {
        out.push(HTTP_HOST.string(host.to_owned()));
    }
    out.push(HTTP_TARGET.string(target(req.uri())));
    if let Some(flavor) = flavor(req.version()) {
        out.push(HTTP_FLAVOR.string(flavor));
    }
    if let Some(agent) = req.header(USER_AGENT.as_str()) {
        out.push(HTTP_USER_AGENT.string(agent.to_owned()));
    }
    if let Some(len) = req.header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<i64>().ok()) {
        if len > 0 {
            out.push(HTTP_REQUEST_CONTENT_LENGTH.i64(len));
        }
    }
}

/// `Host` header, falling back to the URI authority (HTTP/2 `:authority`).
fn host_of(req: &Request) -> Option<&str> {
    req.header(HOST.as_str())
        .filter(|h| !h.is_empty())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// Splits `host[:port]`, handling bracketed IPv6 literals.
fn split_host_port(hostport: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':').and_then(|p| p.parse().ok());
        return Some((host, port));
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host, port.parse().ok())),
        _ => Some((hostport, None)),
    }
}

fn scheme(uri: &Uri) -> &'static str {
    match uri.scheme_str() {
        Some("https") => "https",
        _ => "http",
    }
}

fn target(uri: &Uri) -> String {
    uri.path_and_query().map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

fn flavor(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_10 => Some("1.0"),
        Version::HTTP_11 => Some("1.1"),
        Version::HTTP_2 => Some("2"),
        Version::HTTP_3 => Some("3"),
        _ => None,
    }
}

fn basic_auth_user(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credentials) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(credentials.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, _password) = decoded.split_once(':')?;
    Some(user.to_owned())
}
