//! Streaming request body.
//!
//! A [`Body`] is a stream of frames, not a buffer. The server hands handlers
//! hyper's `Incoming` stream unread; middleware may wrap it (the tracing layer
//! does, to observe bytes as they flow past). Use [`Body::collect`] or
//! [`Request::bytes`](crate::Request::bytes) when you want the whole thing.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::error::{BoxError, Error};

/// A type-erased request body.
///
/// `Send` but not `Sync`: a body is consumed by exactly one task.
pub struct Body(UnsyncBoxBody<Bytes, BoxError>);

impl Body {
    /// Erases any `http_body::Body` with `Bytes` data frames.
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(Into::into).boxed_unsync())
    }

    /// A body that is already at end-of-stream.
    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// Reads every remaining frame and concatenates the data.
    pub async fn collect(self) -> Result<Bytes, Error> {
        let collected = BodyExt::collect(self.0).await.map_err(Error::body)?;
        Ok(collected.to_bytes())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::new(Full::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from(Bytes::from_static(s.as_bytes()))
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().0).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}
