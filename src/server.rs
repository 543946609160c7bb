//! hyper accept loop feeding requests through a [`Service`].
//!
//! Each request is run into a [`ResponseBuffer`] and sent once the service
//! returns. The peer address is stored as a [`RemoteAddr`] extension so
//! middleware can report it.
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C (or the future given to
//! [`Server::serve_with_shutdown`]) the loop stops accepting, waits for every
//! open connection to finish, then returns. Spans for in-flight requests end
//! as those requests complete, so flush the tracer provider after `serve`
//! returns.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::body::Body;
use crate::error::Error;
use crate::handler::Service;
use crate::request::{RemoteAddr, Request};
use crate::response::ResponseBuffer;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Parses `addr`; the socket is opened by [`serve`](Server::serve).
    ///
    /// ```rust
    /// use tsu_otel::Server;
    /// let _server = Server::bind("0.0.0.0:3000").unwrap();
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        Ok(Self { addr: addr.parse()? })
    }

    /// Starts accepting connections and dispatching them through `service`.
    ///
    /// Runs until SIGTERM or Ctrl-C and all open connections have drained.
    pub async fn serve<S: Service>(self, service: S) -> Result<(), Error> {
        self.serve_with_shutdown(service, shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve), but stops accepting when `signal`
    /// resolves instead of on process signals.
    pub async fn serve_with_shutdown<S, F>(self, service: S, signal: F) -> Result<(), Error>
    where
        S: Service,
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let service = Arc::new(service);

        info!(addr = %self.addr, "tsu listening");

        // One task per connection, joined on shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut signal => {
                    info!(connections = tasks.len(), "shutting down");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let service = Arc::clone(&service);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let service = Arc::clone(&service);
                            async move { dispatch(service, req, remote_addr).await }
                        });

                        // Handles both HTTP/1.1 and HTTP/2.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("tsu stopped");
        Ok(())
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Runs one request through the service stack into a buffered response.
///
/// Every failure is already an HTTP response by the time the stack returns,
/// so hyper never sees an error.
async fn dispatch<S: Service>(
    service: Arc<S>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let mut req = Request::new(req.map(Body::new));
    req.extensions_mut().insert(RemoteAddr(remote_addr));

    let mut buffer = ResponseBuffer::new();
    service.call(req, &mut buffer).await;

    Ok(buffer.into_response())
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// SIGTERM or Ctrl-C, whichever comes first. A signal whose handler fails to
/// install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::router::Router;

    async fn echo(mut req: Request) -> (StatusCode, String) {
        let peer = req.remote_addr().map(|a| a.ip().to_string()).unwrap_or_default();
        let body = req.bytes().await.unwrap_or_default();
        (StatusCode::CREATED, format!("{peer} {}", String::from_utf8_lossy(&body)))
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::bind(&format!("127.0.0.1:{port}")).unwrap();
        let running = tokio::spawn(server.serve_with_shutdown(
            Router::new().post("/echo", echo),
            async { stopped.await.unwrap_or(()) },
        ));

        let mut stream = loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"POST /echo HTTP/1.1\r\nhost: localhost\r\ncontent-length: 2\r\nconnection: close\r\n\r\nhi")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 201 Created"), "{raw}");
        assert!(raw.ends_with("127.0.0.1 hi"), "{raw}");

        stop.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
