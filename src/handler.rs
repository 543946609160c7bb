//! Service trait, Handler trait and type erasure.
//!
//! # Two ways to answer a request
//!
//! A [`Service`] is the low-level contract every layer implements: it gets the
//! request by value and a borrowed [`ResponseWriter`] to write into. The
//! router is a service, the tracing middleware is a service wrapping another
//! service, and so on down the stack.
//!
//! A [`Handler`] is what application code writes: a plain `async fn` taking a
//! [`Request`] and returning anything that implements [`IntoResponse`]. The
//! router erases each handler into a service:
//!
//! ```text
//! router.get("/users/{id}", get_user)
//!   -> get_user.into_boxed_handler()      Arc<FnHandler<_>> as Arc<dyn Service>
//!
//! per request:
//!   Traced::call(req, &mut buffer)
//!     -> Router::call(req, &mut recorder)
//!       -> FnHandler::call(req, &mut recorder)
//!         -> get_user(req).await.into_response().write_to(&mut recorder)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::request::Request;
use crate::response::{IntoResponse, ResponseWriter};

/// A heap-allocated, type-erased future borrowing the service and the writer
/// for `'a`.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Answers one request by writing into `w`.
///
/// Implementations must not keep `w` past the returned future; the borrow
/// checker enforces that.
pub trait Service: Send + Sync + 'static {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a>;
}

impl<S: Service + ?Sized> Service for Arc<S> {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        (**self).call(req, w)
    }
}

impl<S: Service + ?Sized> Service for Box<S> {
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        (**self).call(req, w)
    }
}

/// A type-erased service shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Service>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Any `async fn` usable as a route:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a typed `async fn` handler to the [`Service`] trait object.
struct FnHandler<F>(F);

impl<F, Fut, R> Service for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call<'a>(&'a self, req: Request, w: &'a mut dyn ResponseWriter) -> BoxFuture<'a> {
        let fut = (self.0)(req);
        Box::pin(async move {
            if let Err(e) = fut.await.into_response().write_to(w) {
                debug!(error = %e, "response write failed");
            }
        })
    }
}
