//! Unified error type.

use std::fmt;

/// Boxed error carried by body streams.
///
/// This is the hyper ecosystem convention: any body error converts into it,
/// so a request body can be backed by hyper's `Incoming`, an in-memory buffer,
/// or a test stream without changing the handler signature.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by tsu's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP responses,
/// not as `Error`s. This type surfaces infrastructure failures: binding to a
/// port, accepting a connection, or a request body stream breaking mid-read.
#[derive(Debug)]
pub struct Error(Kind);

#[derive(Debug)]
enum Kind {
    Addr(std::net::AddrParseError),
    Body(BoxError),
    Io(std::io::Error),
}

impl Error {
    pub(crate) fn body(e: impl Into<BoxError>) -> Self {
        Self(Kind::Body(e.into()))
    }

    /// `true` if the error came from reading a request body.
    pub fn is_body(&self) -> bool {
        matches!(self.0, Kind::Body(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Kind::Addr(e) => write!(f, "invalid address: {e}"),
            Kind::Body(e) => write!(f, "body: {e}"),
            Kind::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            Kind::Addr(e) => Some(e),
            Kind::Body(e) => Some(e.as_ref()),
            Kind::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self(Kind::Io(e))
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Self(Kind::Addr(e))
    }
}
