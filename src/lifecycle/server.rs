//! The lifecycle controller.
//!
//! # Responsibilities
//! - Bind every configured listen spec before any socket starts listening
//! - Start accept loops and report the outcome exactly once
//! - Stop idempotently: the first call tears down, every later call
//!   observes the terminal state and returns
//! - Route credential and ticket-seed updates into live identity stores

use std::collections::HashSet;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::RawFd;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::config::schema::{ListenSpec, Protocol, ServerConfig, TicketSeedSet};
use crate::config::validation::validate_config;
use crate::error::ServerError;
use crate::handler::chain::HandlerChain;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::state::LifecycleState;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{accept_loop, ListenerContext};
use crate::net::socket::{AdoptedSocket, BoundSocket};
use crate::security::admission::AdmissionPolicy;
use crate::tls::identity::TlsIdentityStore;

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    chain: HandlerChain,
    admission: Option<Arc<dyn AdmissionPolicy>>,
    adopted: Vec<AdoptedSocket>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Append one listen spec to the configuration.
    pub fn listener(mut self, spec: ListenSpec) -> Self {
        self.config.listeners.push(spec);
        self
    }

    /// Set the handler chain shared by every listener.
    pub fn handler_chain(mut self, chain: HandlerChain) -> Self {
        self.chain = chain;
        self
    }

    /// Install the admission policy applied to every accepted transport.
    pub fn admission_policy<P: AdmissionPolicy + 'static>(mut self, policy: P) -> Self {
        self.admission = Some(Arc::new(policy));
        self
    }

    /// Adopt an externally created socket. Adopted sockets are consumed
    /// positionally: the first adopted socket backs the first listen spec,
    /// and so on; remaining specs bind fresh sockets.
    pub fn adopt_socket(mut self, socket: AdoptedSocket) -> Self {
        self.adopted.push(socket);
        self
    }

    /// Validate the configuration and construct the server.
    pub fn build(self) -> Result<Server, ServerError> {
        validate_config(&self.config).map_err(|errors| {
            ServerError::Config(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;

        let (state, _) = watch::channel(LifecycleState::Created);
        Ok(Server {
            shared: Arc::new(ServerShared {
                config: self.config,
                chain: self.chain,
                admission: self.admission,
                lifecycle: Mutex::new(LifecycleInner {
                    adopted: self.adopted,
                    bound: Vec::new(),
                    running: Vec::new(),
                }),
                state,
                shutdown: Shutdown::new(),
                tracker: ConnectionTracker::new(),
            }),
        })
    }
}

/// The embeddable server core.
///
/// Cheap to clone; all clones drive the same underlying lifecycle. Every
/// entry point may be called from any task: transitions are serialized by a
/// single lifecycle mutex, so a `stop` issued while `start` is in flight
/// waits for `start` to settle instead of interleaving with partial
/// startup state.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    config: ServerConfig,
    chain: HandlerChain,
    admission: Option<Arc<dyn AdmissionPolicy>>,
    lifecycle: Mutex<LifecycleInner>,
    state: watch::Sender<LifecycleState>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
}

struct LifecycleInner {
    adopted: Vec<AdoptedSocket>,
    bound: Vec<BoundListener>,
    running: Vec<RunningListener>,
}

struct BoundListener {
    socket: BoundSocket,
    spec: ListenSpec,
    store: Option<Arc<TlsIdentityStore>>,
}

struct RunningListener {
    addr: SocketAddr,
    #[cfg(unix)]
    fd: RawFd,
    store: Option<Arc<TlsIdentityStore>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Number of connections currently tracked.
    pub fn active_connections(&self) -> u64 {
        self.shared.tracker.active_count()
    }

    /// Bind every listen spec. All sockets are acquired and bound before
    /// any of them starts listening, so a late failure cannot leave an
    /// earlier socket half-initialized in listening state. On failure every
    /// already-bound socket is released and the server is `FailedToStart`.
    pub async fn bind(&self) -> Result<(), ServerError> {
        let mut inner = self.shared.lifecycle.lock().await;
        let state = self.state();
        if state != LifecycleState::Created {
            return Err(ServerError::Lifecycle(format!(
                "bind invoked in state {state}"
            )));
        }
        self.set_state(LifecycleState::Binding);

        match self.bind_all(&mut inner) {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.bound.clear();
                self.set_state(LifecycleState::FailedToStart);
                Err(e)
            }
        }
    }

    /// Begin listening and accepting on every bound socket. Resolves
    /// exactly once with the outcome; on failure all partial listeners are
    /// unwound and their sockets released. Accept loops keep running on
    /// their own tasks after this returns.
    ///
    /// If listen specs are configured but `bind` was never called, the bind
    /// phase runs here first, so `start` alone still brings every
    /// configured listener up. Starting with nothing configured yields a
    /// running server with zero listeners.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut inner = self.shared.lifecycle.lock().await;
        let state = self.state();
        if !state.can_start() {
            return Err(ServerError::Lifecycle(format!(
                "start invoked in state {state}"
            )));
        }

        if inner.bound.is_empty() && !self.shared.config.listeners.is_empty() {
            self.set_state(LifecycleState::Binding);
            if let Err(e) = self.bind_all(&mut inner) {
                inner.bound.clear();
                self.set_state(LifecycleState::FailedToStart);
                return Err(match e {
                    ServerError::ListenerStart(_) => e,
                    other => ServerError::ListenerStart(other.to_string()),
                });
            }
        }

        match self.listen_all(&mut inner) {
            Ok(()) => {
                self.shared.chain.notify_start(&Handle::current());
                self.set_state(LifecycleState::Running);
                tracing::info!(listeners = inner.running.len(), "Server running");
                Ok(())
            }
            Err(e) => {
                for listener in inner.running.drain(..) {
                    for task in listener.tasks {
                        task.abort();
                    }
                }
                inner.bound.clear();
                self.set_state(LifecycleState::FailedToStart);
                Err(match e {
                    ServerError::ListenerStart(_) => e,
                    other => ServerError::ListenerStart(other.to_string()),
                })
            }
        }
    }

    /// Stop the server. Blocks until accept loops have exited and listening
    /// sockets are closed. Never raises: redundant calls, sequential or
    /// concurrent, observe the terminal state and return without re-entering
    /// teardown.
    ///
    /// Connections already admitted are not closed here; draining them is
    /// the protocol layer's responsibility.
    pub async fn stop(&self) {
        let mut inner = self.shared.lifecycle.lock().await;
        match self.state() {
            LifecycleState::Running => {}
            LifecycleState::Binding => {
                // Bound but never started: releasing the sockets is the
                // whole teardown.
                inner.bound.clear();
                self.set_state(LifecycleState::Stopped);
                tracing::info!("Server stopped before start; bound sockets released");
                return;
            }
            _ => return,
        }

        self.set_state(LifecycleState::Stopping);
        self.shared.shutdown.trigger();

        let running = std::mem::take(&mut inner.running);
        for listener in running {
            for task in listener.tasks {
                let _ = task.await;
            }
            tracing::debug!(listener = %listener.addr, "Listener stopped");
        }

        self.shared.chain.notify_stop();
        self.set_state(LifecycleState::Stopped);
        tracing::info!(
            in_flight = self.shared.tracker.active_count(),
            "Server stopped"
        );
    }

    /// Stop accepting new connections while leaving the server alive.
    /// Pending, not-yet-accepted connection attempts are cancelled at the
    /// socket layer; admitted connections continue undisturbed.
    pub async fn stop_listening(&self) {
        let mut inner = self.shared.lifecycle.lock().await;
        if self.state() != LifecycleState::Running {
            return;
        }

        self.shared.shutdown.trigger();
        let running = std::mem::take(&mut inner.running);
        for listener in running {
            for task in listener.tasks {
                let _ = task.await;
            }
        }
        tracing::info!("Stopped listening; server remains alive");
    }

    /// The OS descriptor of the first listener, or `None` when nothing is
    /// bound or listening was explicitly stopped.
    #[cfg(unix)]
    pub async fn listen_socket(&self) -> Option<RawFd> {
        self.listen_sockets().await.into_iter().next()
    }

    /// OS descriptors of all listeners, in spec order.
    #[cfg(unix)]
    pub async fn listen_sockets(&self) -> Vec<RawFd> {
        let inner = self.shared.lifecycle.lock().await;
        if !inner.running.is_empty() {
            inner.running.iter().map(|l| l.fd).collect()
        } else {
            inner.bound.iter().map(|l| l.socket.raw_fd()).collect()
        }
    }

    /// Resolved listen addresses, in spec order. Ephemeral ports show their
    /// assigned value.
    pub async fn listen_addrs(&self) -> Vec<SocketAddr> {
        let inner = self.shared.lifecycle.lock().await;
        if !inner.running.is_empty() {
            inner.running.iter().map(|l| l.addr).collect()
        } else {
            inner.bound.iter().map(|l| l.socket.local_addr()).collect()
        }
    }

    /// Reload certificate material from every listener's configured
    /// sources. Callable at any time; new handshakes pick the new identity
    /// up immediately, live connections are untouched.
    pub async fn update_tls_credentials(&self) -> Result<(), ServerError> {
        let inner = self.shared.lifecycle.lock().await;
        for store in identity_stores(&inner) {
            store.update_credentials()?;
        }
        Ok(())
    }

    /// Replace the session-ticket seed set on every TLS listener. Tickets
    /// minted under seeds absent from the new set stop resuming, forcing a
    /// full handshake.
    pub async fn update_ticket_seeds(&self, seeds: &TicketSeedSet) -> Result<(), ServerError> {
        let inner = self.shared.lifecycle.lock().await;
        for store in identity_stores(&inner) {
            store.update_ticket_seeds(seeds)?;
        }
        Ok(())
    }

    /// The identity stores of all TLS listeners, e.g. for wiring a
    /// credential file watcher.
    pub async fn identity_stores(&self) -> Vec<Arc<TlsIdentityStore>> {
        let inner = self.shared.lifecycle.lock().await;
        identity_stores(&inner).cloned().collect()
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = self.shared.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "Lifecycle transition");
        }
    }

    fn bind_all(&self, inner: &mut LifecycleInner) -> Result<(), ServerError> {
        let specs = &self.shared.config.listeners;

        // Duplicate targets inside one bind call conflict before any OS bind
        // is attempted.
        let mut seen: HashSet<SocketAddr> = HashSet::new();
        for spec in specs {
            if spec.addr.port() != 0 && !seen.insert(spec.addr) {
                return Err(ServerError::BindConflict {
                    addr: spec.addr.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "duplicate listen spec",
                    ),
                });
            }
        }

        let mut adopted = std::mem::take(&mut inner.adopted).into_iter();

        for spec in specs.iter().cloned() {
            let store = if spec.tls.is_empty() {
                None
            } else {
                match TlsIdentityStore::from_settings(
                    &spec.tls,
                    spec.ticket_seeds.as_ref(),
                    alpn_for(spec.protocol),
                ) {
                    Ok(store) => Some(store),
                    Err(e) if spec.strict_tls => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            listener = %spec.addr,
                            error = %e,
                            "TLS credentials unavailable, listener degraded to plaintext"
                        );
                        None
                    }
                }
            };

            let socket = match adopted.next() {
                #[cfg(unix)]
                Some(existing) => BoundSocket::adopt(existing)?,
                #[cfg(not(unix))]
                Some(_) => {
                    return Err(ServerError::Config(
                        "socket adoption is not supported on this platform".into(),
                    ))
                }
                None => BoundSocket::bind(spec.addr)?,
            };

            tracing::info!(
                requested = %spec.addr,
                bound = %socket.local_addr(),
                tls = store.is_some(),
                adopted = socket.is_adopted(),
                "Listener bound"
            );
            inner.bound.push(BoundListener { socket, spec, store });
        }

        Ok(())
    }

    fn listen_all(&self, inner: &mut LifecycleInner) -> Result<(), ServerError> {
        let workers = self.shared.config.workers.max(1);
        let handler = self.shared.chain.compose();
        let bound: Vec<BoundListener> = inner.bound.drain(..).collect();

        for BoundListener { socket, spec, store } in bound {
            let addr = socket.local_addr();
            #[cfg(unix)]
            let fd = socket.raw_fd();

            let listener = Arc::new(socket.listen()?);
            let ctx = Arc::new(ListenerContext {
                addr,
                protocol: spec.protocol,
                allow_insecure: spec.allow_insecure_on_secure_port,
                tls: store.clone(),
                handler: Arc::clone(&handler),
                admission: self.shared.admission.clone(),
                tracker: self.shared.tracker.clone(),
                limit: Arc::new(Semaphore::new(spec.max_connections)),
            });

            let tasks = (0..workers)
                .map(|_| {
                    let listener = Arc::clone(&listener);
                    let ctx = Arc::clone(&ctx);
                    let shutdown = self.shared.shutdown.subscribe();
                    tokio::spawn(accept_loop(listener, ctx, shutdown))
                })
                .collect();

            tracing::info!(listener = %addr, workers, "Listener accepting");
            inner.running.push(RunningListener {
                addr,
                #[cfg(unix)]
                fd,
                store,
                tasks,
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("listeners", &self.shared.config.listeners.len())
            .finish_non_exhaustive()
    }
}

fn identity_stores(inner: &LifecycleInner) -> impl Iterator<Item = &Arc<TlsIdentityStore>> {
    inner
        .bound
        .iter()
        .filter_map(|b| b.store.as_ref())
        .chain(inner.running.iter().filter_map(|r| r.store.as_ref()))
}

fn alpn_for(protocol: Protocol) -> Vec<Vec<u8>> {
    match protocol {
        Protocol::Http => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        Protocol::Http2 => vec![b"h2".to_vec()],
    }
}
