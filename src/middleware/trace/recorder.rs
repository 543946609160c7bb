//! Write-through recording of the response, and the pool its state comes from.

use std::io;

use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;

use crate::response::ResponseWriter;

/// Idle capture states kept by a pool before extras are dropped.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Capture buffers larger than this are freed instead of returned to the pool.
pub const MAX_RETAINED_BODY: usize = 64 * 1024;

/// What a [`Recorder`] has seen of one response.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    status: Option<StatusCode>,
    body: Vec<u8>,
    metadata_only: bool,
}

impl ResponseCapture {
    fn reset(&mut self, metadata_only: bool) {
        self.status = None;
        self.body.clear();
        self.metadata_only = metadata_only;
    }
}

/// A [`ResponseWriter`] decorator that notes the first committed status and,
/// unless in metadata-only mode, the body bytes.
///
/// Every call is forwarded to the wrapped writer after bookkeeping; return
/// values and errors come straight from it. Obtained from
/// [`RecorderPool::acquire`]; dropping it hands its state back to the pool
/// and ends the borrow of the wrapped writer.
pub struct Recorder<'a> {
    sink: &'a mut dyn ResponseWriter,
    capture: ResponseCapture,
    pool: &'a RecorderPool,
}

impl Recorder<'_> {
    /// `true` once a status or body write went through.
    pub fn written(&self) -> bool {
        self.capture.status.is_some()
    }

    /// First status written, explicitly or implied by a body write.
    pub fn status(&self) -> Option<StatusCode> {
        self.capture.status
    }

    /// Body bytes written so far. Always empty in metadata-only mode.
    pub fn body(&self) -> &[u8] {
        &self.capture.body
    }
}

impl ResponseWriter for Recorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.sink.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.capture.status.is_none() {
            self.capture.status = Some(status);
        }
        self.sink.write_status(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.capture.status.is_none() {
            self.capture.status = Some(StatusCode::OK);
        }
        if !self.capture.metadata_only && !buf.is_empty() {
            self.capture.body.extend_from_slice(buf);
        }
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl Drop for Recorder<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.capture));
    }
}

/// Freelist of recorder capture state shared by concurrent requests.
///
/// Entries are moved out under the lock, so two requests never hold the same
/// one.
#[derive(Debug)]
pub struct RecorderPool {
    idle: Mutex<Vec<ResponseCapture>>,
    max_idle: usize,
}

impl RecorderPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self { idle: Mutex::new(Vec::new()), max_idle }
    }

    /// Wraps `sink` in a recorder with no status and an empty buffer.
    pub fn acquire<'a>(
        &'a self,
        sink: &'a mut dyn ResponseWriter,
        metadata_only: bool,
    ) -> Recorder<'a> {
        let mut capture = self.idle.lock().pop().unwrap_or_default();
        capture.reset(metadata_only);
        Recorder { sink, capture, pool: self }
    }

    /// Returns the recorder's state to the pool. Same as dropping it.
    pub fn release(&self, recorder: Recorder<'_>) {
        drop(recorder);
    }

    /// Number of idle entries waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, mut capture: ResponseCapture) {
        if capture.body.capacity() > MAX_RETAINED_BODY {
            capture.body = Vec::new();
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(capture);
        }
    }
}

impl Default for RecorderPool {
    fn default() -> Self {
        Self::new()
    }
}
