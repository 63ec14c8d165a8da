//! Accept loop.
//!
//! Each accepted connection runs on its own task: TLS handshake (when a
//! context is configured, bounded by the handshake timeout), then HTTP/1.1
//! or HTTP/2 via `hyper-util`'s auto builder. Every request on the connection carries a clone of the
//! connection's [`ConnectionInfo`] in its extensions.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use super::Site;
use crate::Result;
use crate::transport::ConnectionInfo;

/// HTTP(S) server for a [`Site`].
pub struct Server {
    router: Router,
    tls: Option<TlsAcceptor>,
    shutdown_timeout: Duration,
    handshake_timeout: Duration,
}

impl Server {
    /// Plain-HTTP server for `site`.
    pub fn new(site: Site) -> Self {
        Self {
            router: site.router(),
            tls: None,
            shutdown_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Serve HTTPS with `context`.
    #[must_use]
    pub fn with_tls(mut self, context: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(TlsAcceptor::from(context));
        self
    }

    /// How long in-flight connections may take to finish after shutdown.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// How long a client may take to complete the TLS handshake.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Accept connections on `listener` until `shutdown` is cancelled, then
    /// drain in-flight connections for up to the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            tls = self.tls.is_some(),
            "Listening"
        );

        let connections = TaskTracker::new();
        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
                () = shutdown.cancelled() => break,
            };
            debug!(remote_addr = %remote_addr, "Accepted new connection");

            connections.spawn(serve_connection(
                stream,
                remote_addr,
                self.tls.clone(),
                self.handshake_timeout,
                self.router.clone(),
                shutdown.clone(),
            ));
        }

        connections.close();
        info!(
            in_flight = connections.len(),
            "Shutting down, draining connections"
        );
        if tokio::time::timeout(self.shutdown_timeout, connections.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = connections.len(),
                "Shutdown timeout elapsed, dropping connections"
            );
        }

        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("tls", &self.tls.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    router: Router,
    shutdown: CancellationToken,
) {
    match tls {
        Some(acceptor) => {
            let handshake = tokio::select! {
                result = tokio::time::timeout(handshake_timeout, acceptor.accept(stream)) => result,
                () = shutdown.cancelled() => {
                    debug!(remote_addr = %remote_addr, "Shutdown during TLS handshake");
                    return;
                }
            };
            let tls_stream = match handshake {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    warn!(error = %e, remote_addr = %remote_addr, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    warn!(
                        remote_addr = %remote_addr,
                        timeout = ?handshake_timeout,
                        "TLS handshake timed out"
                    );
                    return;
                }
            };
            let info = ConnectionInfo::tls(remote_addr, tls_stream.get_ref().1.peer_certificates());
            debug!(
                remote_addr = %remote_addr,
                client_certificate = info.peer_certificate().is_some(),
                "TLS handshake complete"
            );
            drive(TokioIo::new(tls_stream), info, router, shutdown).await;
        }
        None => {
            let info = ConnectionInfo::plain(remote_addr);
            drive(TokioIo::new(stream), info, router, shutdown).await;
        }
    }
}

async fn drive<I>(io: TokioIo<I>, info: ConnectionInfo, router: Router, shutdown: CancellationToken)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let closed = info.closed.clone();
    let remote_addr = info.remote_addr;

    let service = service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(info.clone());
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    closed.cancel();

    if let Err(e) = result {
        debug!(error = %e, remote_addr = ?remote_addr, "Error serving connection");
    }
}

/// Resolves on Ctrl-C or SIGTERM and cancels `token`.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = token.cancelled() => return,
    }

    info!("Shutdown signal received");
    token.cancel();
}
