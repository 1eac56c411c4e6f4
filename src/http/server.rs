//! HTTP/1.1 listener

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{handle_request, AppState};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server that exposes the bridge
pub struct HttpServer {
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self {
            state: Arc::new(state),
            addr,
        }
    }

    /// Bind and serve until Ctrl+C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await?;
        Ok(())
    }

    /// Serve connections from `listener` until `shutdown` completes, then
    /// wait for open connections to finish their in-flight requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("HTTP server listening on http://{}", listener.local_addr()?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        // Back off so fd exhaustion does not spin the loop
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            let io = TokioIo::new(stream);
            let state = self.state.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { handle_request(req, state).await }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(err) = res {
                            debug!("Error serving connection from {}: {:?}", peer, err);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(err) = conn.await {
                            debug!("Error closing connection from {}: {:?}", peer, err);
                        }
                    }
                }
            });
        }

        drop(listener);
        drop(shutdown_rx);
        let _ = shutdown_tx.send(true);
        // Resolves once every connection task has dropped its receiver
        shutdown_tx.closed().await;
        info!("HTTP server stopped");
        Ok(())
    }
}
