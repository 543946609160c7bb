//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is itself a
//! [`Service`], so middleware wraps it like any other service.
//!
//! Besides dispatching, the router answers two questions for middleware:
//!
//! - *before* handling, "which route pattern would this method + path hit?"
//!   through the [`Routes`] capability;
//! - *after* handling, "which route pattern did you actually dispatch to?"
//!   through the request-scoped [`RouteContext`].

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use parking_lot::Mutex;
use tracing::debug;

use crate::handler::{BoxFuture, BoxedHandler, Handler, Service};
use crate::request::Request;
use crate::response::{Response, ResponseWriter};

// ── Routes capability ─────────────────────────────────────────────────────────

/// Resolves a method + path to the route pattern it would be dispatched to,
/// without dispatching.
pub trait Routes: Send + Sync {
    fn match_route(&self, method: &Method, path: &str) -> Option<String>;
}

impl<R: Routes + ?Sized> Routes for Arc<R> {
    fn match_route(&self, method: &Method, path: &str) -> Option<String> {
        (**self).match_route(method, path)
    }
}

// ── RouteContext ──────────────────────────────────────────────────────────────

/// Request-scoped routing state, shared between the router and the layers
/// wrapped around it.
///
/// A layer that wants to know the matched pattern after the fact calls
/// [`RouteContext::attach`] before passing the request on, keeps the returned
/// handle, and reads [`pattern`](Self::pattern) once the inner service is done.
#[derive(Clone, Debug, Default)]
pub struct RouteContext(Arc<Mutex<Option<Arc<str>>>>);

impl RouteContext {
    /// Returns the request's context, inserting a fresh one if absent.
    pub fn attach(req: &mut Request) -> Self {
        if let Some(existing) = req.extensions().get::<Self>() {
            return existing.clone();
        }
        let cx = Self::default();
        req.extensions_mut().insert(cx.clone());
        cx
    }

    /// The pattern the router dispatched to, if it found one.
    pub fn pattern(&self) -> Option<String> {
        self.0.lock().as_deref().map(str::to_owned)
    }

    pub(crate) fn set_pattern(&self, pattern: &Arc<str>) {
        *self.0.lock() = Some(Arc::clone(pattern));
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

struct Route {
    pattern: Arc<str>,
    handler: BoxedHandler,
}

/// The application router.
///
/// One radix tree per HTTP method. Build it once at startup; wrap it in
/// middleware or pass it straight to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so calls chain naturally.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or conflicts with an existing
    /// route for the same method. Routes are static configuration; a bad one
    /// is a programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let route = Route { pattern: Arc::from(path), handler: handler.into_boxed_handler() };
        self.routes
            .entry(method)
            .or_default()
            .insert(path, route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value, params))
    }

    /// Methods that have a route for `path`, for the `Allow` header.
    fn allowed(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }
}

impl Routes for Router {
    fn match_route(&self, method: &Method, path: &str) -> Option<String> {
        self.routes.get(method)?.at(path).ok().map(|m| m.value.pattern.to_string())
    }
}

impl Service for Router {
    fn call<'a>(&'a self, mut req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        if let Some((route, params)) = self.lookup(req.method(), req.path()) {
            RouteContext::attach(&mut req).set_pattern(&route.pattern);
            req.params = params;
            return route.handler.call(req, w);
        }

        let allowed = self.allowed(req.path());
        let response = if allowed.is_empty() {
            Response::status(StatusCode::NOT_FOUND)
        } else {
            let mut response = Response::status(StatusCode::METHOD_NOT_ALLOWED);
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                response.headers.insert(ALLOW, value);
            }
            response
        };
        Box::pin(async move {
            if let Err(e) = response.write_to(w) {
                debug!(error = %e, "response write failed");
            }
        })
    }
}
