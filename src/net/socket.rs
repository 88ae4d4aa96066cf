//! Socket acquisition: listen specs become bound, not-yet-listening sockets.
//!
//! # Responsibilities
//! - Resolve a `ListenSpec` address into a bound OS socket
//! - Adopt externally created descriptors instead of binding fresh ones
//! - Keep bind separate from listen, so a multi-listener bind can fail as a
//!   unit before any socket accepts traffic
//! - Report the resolved local address (ephemeral ports) and raw descriptor

use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use tokio::net::{TcpListener, TcpSocket};

use crate::error::ServerError;

/// Listen backlog used when a bound socket starts listening.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// An externally created socket to adopt in place of a fresh bind.
#[derive(Debug)]
pub enum AdoptedSocket {
    /// A raw descriptor that is already bound (listening or not).
    #[cfg(unix)]
    Fd(RawFd),
    /// An already-bound standard listener.
    Listener(std::net::TcpListener),
}

/// A bound socket that has not yet begun listening.
///
/// Produced for every `ListenSpec` during the bind phase; converted into a
/// listening socket only once every spec has bound successfully.
#[derive(Debug)]
pub struct BoundSocket {
    socket: TcpSocket,
    local_addr: SocketAddr,
    #[cfg(unix)]
    raw_fd: RawFd,
    adopted: bool,
}

impl BoundSocket {
    /// Bind a fresh socket to `addr`. Port 0 resolves to an ephemeral port,
    /// reported via [`BoundSocket::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(ServerError::Io)?;

        socket.set_reuseaddr(true).map_err(ServerError::Io)?;

        socket.bind(addr).map_err(|e| bind_error(addr, e))?;

        let local_addr = socket.local_addr().map_err(ServerError::Io)?;

        tracing::debug!(requested = %addr, bound = %local_addr, "Socket bound");

        Ok(Self {
            #[cfg(unix)]
            raw_fd: socket.as_raw_fd(),
            socket,
            local_addr,
            adopted: false,
        })
    }

    /// Adopt an externally owned socket. The descriptor's identity is
    /// preserved: [`BoundSocket::raw_fd`] reports the adopted descriptor
    /// unchanged.
    #[cfg(unix)]
    pub fn adopt(adopted: AdoptedSocket) -> Result<Self, ServerError> {
        let fd = match adopted {
            AdoptedSocket::Fd(fd) => {
                // Route through a std listener to set non-blocking mode;
                // the fd value itself is untouched.
                let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
                std_listener.set_nonblocking(true).map_err(ServerError::Io)?;
                std_listener.into_raw_fd()
            }
            AdoptedSocket::Listener(std_listener) => {
                std_listener.set_nonblocking(true).map_err(ServerError::Io)?;
                std_listener.into_raw_fd()
            }
        };

        // Safety: we own the descriptor from here on; the caller handed it over.
        let socket = unsafe { TcpSocket::from_raw_fd(fd) };
        let local_addr = socket.local_addr().map_err(ServerError::Io)?;

        tracing::debug!(fd, bound = %local_addr, "Adopted external socket");

        Ok(Self {
            raw_fd: fd,
            socket,
            local_addr,
            adopted: true,
        })
    }

    /// The resolved local address (ephemeral ports already assigned).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The OS-level descriptor backing this socket.
    #[cfg(unix)]
    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Whether this socket was adopted rather than freshly bound.
    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    /// Begin listening. Consumes the bound socket; the descriptor identity
    /// is unchanged.
    pub fn listen(self) -> Result<TcpListener, ServerError> {
        let addr = self.local_addr;
        self.socket.listen(DEFAULT_BACKLOG).map_err(|e| {
            ServerError::ListenerStart(format!("listen on {addr} failed: {e}"))
        })
    }
}

fn bind_error(addr: SocketAddr, e: std::io::Error) -> ServerError {
    if e.kind() == std::io::ErrorKind::AddrInUse {
        ServerError::BindConflict {
            addr: addr.to_string(),
            source: e,
        }
    } else {
        ServerError::Io(e)
    }
}
