//! Read-through observation of the request body.
//!
//! [`observe`] swaps the request body for an [`ObservedBody`] that forwards
//! every frame untouched and tallies data bytes into a shared
//! [`BodyCapture`]. The handler reads exactly what it would have read
//! without the wrapper; the middleware reads the tally afterwards.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use parking_lot::Mutex;

use crate::body::Body;
use crate::error::BoxError;
use crate::request::Request;

#[derive(Debug, Default)]
struct Captured {
    read: u64,
    bytes: Vec<u8>,
}

/// Handle on the bytes an [`ObservedBody`] has seen so far.
#[derive(Clone, Debug, Default)]
pub struct BodyCapture {
    captured: Arc<Mutex<Captured>>,
    metadata_only: bool,
}

impl BodyCapture {
    fn record(&self, data: &[u8]) {
        let mut captured = self.captured.lock();
        captured.read += data.len() as u64;
        if !self.metadata_only && !data.is_empty() {
            captured.bytes.extend_from_slice(data);
        }
    }

    /// Total data bytes read through the body so far.
    pub fn bytes_read(&self) -> u64 {
        self.captured.lock().read
    }

    /// Moves the captured bytes out, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.captured.lock().bytes)
    }
}

/// A [`Body`] decorator that records data frames as they are polled.
///
/// Dropping it drops the inner body; capture state is untouched.
pub struct ObservedBody {
    inner: Body,
    capture: BodyCapture,
}

impl ObservedBody {
    pub fn new(inner: Body, metadata_only: bool) -> (Self, BodyCapture) {
        let capture = BodyCapture { captured: Arc::default(), metadata_only };
        (Self { inner, capture: capture.clone() }, capture)
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled {
            if let Some(data) = frame.data_ref() {
                this.capture.record(data);
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Installs an [`ObservedBody`] on `req`.
///
/// Returns `None` without touching the request when the body is already at
/// end-of-stream; nothing is allocated in that case.
pub fn observe(req: &mut Request, metadata_only: bool) -> Option<BodyCapture> {
    if req.body().is_end_stream() {
        return None;
    }
    let (observed, capture) = ObservedBody::new(req.replace_body(Body::empty()), metadata_only);
    req.replace_body(Body::new(observed));
    Some(capture)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use http_body_util::BodyExt;

    use super::*;

    /// Yields the given chunks one frame at a time, then optionally fails.
    struct Chunks {
        chunks: VecDeque<&'static [u8]>,
        fail_at_end: bool,
    }

    impl Chunks {
        fn new(chunks: &[&'static [u8]]) -> Self {
            Self { chunks: chunks.iter().copied().collect(), fail_at_end: false }
        }
    }

    impl HttpBody for Chunks {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
            let this = self.get_mut();
            match this.chunks.pop_front() {
                Some(chunk) => Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(chunk))))),
                None if this.fail_at_end => {
                    this.fail_at_end = false;
                    Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))))
                }
                None => Poll::Ready(None),
            }
        }
    }

    fn request(body: Body) -> Request {
        Request::new(http::Request::new(body))
    }

    #[tokio::test]
    async fn two_reads_are_concatenated() {
        let mut req = request(Body::new(Chunks::new(&[b"a", b"bc"])));
        let capture = observe(&mut req, false).unwrap();

        let first = req.body_mut().frame().await.unwrap().unwrap().into_data().unwrap();
        let second = req.body_mut().frame().await.unwrap().unwrap().into_data().unwrap();

        assert_eq!(&first[..], b"a");
        assert_eq!(&second[..], b"bc");
        assert_eq!(capture.bytes_read(), 3);
        assert_eq!(capture.take(), b"abc");
    }

    #[tokio::test]
    async fn handler_sees_identical_bytes() {
        let mut req = request(Body::new(Chunks::new(&[b"hello ", b"wor", b"ld"])));
        let capture = observe(&mut req, false).unwrap();

        let read = req.bytes().await.unwrap();

        assert_eq!(&read[..], b"hello world");
        assert_eq!(capture.take(), read.to_vec());
    }

    #[tokio::test]
    async fn metadata_only_counts_without_buffering() {
        let mut req = request(Body::from("secret payload"));
        let capture = observe(&mut req, true).unwrap();

        req.bytes().await.unwrap();

        assert_eq!(capture.bytes_read(), 14);
        assert!(capture.take().is_empty());
    }

    #[test]
    fn empty_body_is_not_wrapped() {
        let mut req = request(Body::empty());
        assert!(observe(&mut req, false).is_none());
    }

    #[tokio::test]
    async fn errors_pass_through_and_keep_partial_capture() {
        let mut chunks = Chunks::new(&[b"par"]);
        chunks.fail_at_end = true;
        let mut req = request(Body::new(chunks));
        let capture = observe(&mut req, false).unwrap();

        let err = req.bytes().await.unwrap_err();

        assert!(err.is_body());
        assert_eq!(err.to_string(), "body: reset");
        assert_eq!(capture.take(), b"par");
    }
}
