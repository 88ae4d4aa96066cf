//! Listener accept loop.
//!
//! # Responsibilities
//! - Accept transports continuously while the server is running
//! - Enforce the per-listener connection limit via semaphore permits
//! - Detect plaintext-on-secure-port transports by peeking the first byte
//! - Terminate TLS, gate each transport through the admission policy, then
//!   hand it to the protocol layer (hyper)
//! - Exit promptly on the shutdown signal

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;

use crate::config::schema::Protocol;
use crate::handler::chain::Handler;
use crate::net::connection::{
    AdmittedConnection, ConnectionId, ConnectionTracker, TransportSecurity,
};
use crate::observability::metrics;
use crate::security::admission::AdmissionPolicy;
use crate::tls::identity::TlsIdentityStore;

/// First byte of a TLS record carrying a handshake message.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Everything an accept task needs, shared across the listener's tasks.
pub(crate) struct ListenerContext {
    pub addr: SocketAddr,
    pub protocol: Protocol,
    pub allow_insecure: bool,
    /// Identity store for secured listeners. The active rustls
    /// configuration is read per accepted transport so credential reloads
    /// (including client-CA changes) apply without touching the listener.
    pub tls: Option<Arc<TlsIdentityStore>>,
    pub handler: Arc<dyn Handler>,
    pub admission: Option<Arc<dyn AdmissionPolicy>>,
    pub tracker: ConnectionTracker,
    pub limit: Arc<Semaphore>,
}

/// Accept transports until the shutdown signal fires. Several of these may
/// run concurrently against the same listener.
pub(crate) async fn accept_loop(
    listener: Arc<TcpListener>,
    ctx: Arc<ListenerContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // Acquire the connection slot first so a full listener exerts
        // backpressure at the accept queue.
        let permit = tokio::select! {
            permit = ctx.limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.recv() => break,
        };

        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(listener = %ctx.addr, error = %e, "Accept failed");
                    continue;
                }
            },
            _ = shutdown.recv() => break,
        };

        metrics::record_accepted();
        tracing::trace!(listener = %ctx.addr, peer = %peer_addr, "Connection accepted");

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _permit = permit;
            handle_connection(stream, peer_addr, ctx).await;
        });
    }

    tracing::debug!(listener = %ctx.addr, "Accept loop stopped");
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<ListenerContext>) {
    let id = ConnectionId::new();
    let _guard = ctx.tracker.track(id);

    match &ctx.tls {
        None => {
            let conn = plaintext_connection(id, peer_addr);
            dispatch(stream, conn, &ctx).await;
        }
        Some(store) => {
            if ctx.allow_insecure && !peeks_as_tls(&stream).await {
                tracing::debug!(connection_id = %id, peer = %peer_addr, "Non-TLS first bytes, routing as plaintext");
                let conn = plaintext_connection(id, peer_addr);
                dispatch(stream, conn, &ctx).await;
                return;
            }

            let acceptor = TlsAcceptor::from(store.server_config());
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let conn = {
                        let (_, session) = tls_stream.get_ref();
                        AdmittedConnection {
                            id,
                            peer_addr,
                            security: TransportSecurity::Tls,
                            alpn: session.alpn_protocol().map(<[u8]>::to_vec),
                            server_name: session.server_name().map(str::to_string),
                            peer_certificate: session
                                .peer_certificates()
                                .and_then(|certs| certs.first().cloned()),
                        }
                    };
                    dispatch(tls_stream, conn, &ctx).await;
                }
                Err(e) => {
                    metrics::record_handshake_failure();
                    tracing::debug!(connection_id = %id, peer = %peer_addr, error = %e, "TLS handshake failed");
                }
            }
        }
    }
}

fn plaintext_connection(id: ConnectionId, peer_addr: SocketAddr) -> AdmittedConnection {
    AdmittedConnection {
        id,
        peer_addr,
        security: TransportSecurity::Plaintext,
        alpn: None,
        server_name: None,
        peer_certificate: None,
    }
}

/// Peek the first byte without consuming it. A TLS transport leads with a
/// handshake record; anything else is routed as plaintext.
async fn peeks_as_tls(stream: &TcpStream) -> bool {
    let mut first = [0u8; 1];
    match stream.peek(&mut first).await {
        Ok(n) if n > 0 => first[0] == TLS_HANDSHAKE_RECORD,
        _ => false,
    }
}

/// Gate through the admission policy, then serve the transport.
async fn dispatch<IO>(io: IO, conn: AdmittedConnection, ctx: &ListenerContext)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if let Some(policy) = &ctx.admission {
        if let Err(veto) = policy.admit(&conn) {
            metrics::record_rejected();
            tracing::info!(
                connection_id = %conn.id,
                peer = %conn.peer_addr,
                reason = %veto.reason,
                "Connection vetoed by admission policy"
            );
            // Dropping the transport closes it; the peer sees no response.
            return;
        }
    }
    metrics::record_admitted();

    let conn = Arc::new(conn);
    let handler = Arc::clone(&ctx.handler);
    let service = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        let conn = Arc::clone(&conn);
        async move { Ok::<_, Infallible>(handler.handle(&conn, req).await) }
    });

    let io = TokioIo::new(io);
    let served = match ctx.protocol {
        Protocol::Http => {
            hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
                .map_err(|e| e.to_string())
        }
        Protocol::Http2 => hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
            .map_err(|e| e.to_string()),
    };

    if let Err(e) = served {
        tracing::debug!(listener = %ctx.addr, error = %e, "Connection ended with protocol error");
    }
}
