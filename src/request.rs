//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri, Version};

use crate::body::Body;
use crate::error::Error;

/// Peer address of the connection a request arrived on.
///
/// The server stores it in the request extensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoteAddr(pub SocketAddr);

/// An incoming HTTP request.
///
/// The body is a stream; middleware may have wrapped it before the handler
/// sees it. Path parameters are filled in by the [`Router`](crate::Router).
#[derive(Debug)]
pub struct Request {
    pub(crate) inner: http::Request<Body>,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub fn new(inner: http::Request<Body>) -> Self {
        Self { inner, params: HashMap::new() }
    }

    pub fn method(&self) -> &Method { self.inner.method() }
    pub fn uri(&self) -> &Uri { self.inner.uri() }
    pub fn path(&self) -> &str { self.inner.uri().path() }
    pub fn version(&self) -> Version { self.inner.version() }
    pub fn headers(&self) -> &HeaderMap { self.inner.headers() }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }
    pub fn extensions(&self) -> &Extensions { self.inner.extensions() }
    pub fn extensions_mut(&mut self) -> &mut Extensions { self.inner.extensions_mut() }
    pub fn body(&self) -> &Body { self.inner.body() }
    pub fn body_mut(&mut self) -> &mut Body { self.inner.body_mut() }

    /// Header lookup. Returns `None` for absent or non-ASCII values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Address of the connected peer, when the request came through [`Server`](crate::Server).
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.extensions().get::<RemoteAddr>().map(|a| a.0)
    }

    /// Swaps the body for `body`, returning the previous one.
    pub fn replace_body(&mut self, body: Body) -> Body {
        std::mem::replace(self.inner.body_mut(), body)
    }

    /// Reads the rest of the body into memory.
    ///
    /// The body is left empty afterwards.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        self.replace_body(Body::empty()).collect().await
    }
}

impl From<http::Request<Body>> for Request {
    fn from(inner: http::Request<Body>) -> Self {
        Self::new(inner)
    }
}
