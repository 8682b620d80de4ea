use std::net::SocketAddr;
use thiserror::Error;

/// Result type for netflow plugin operations
pub type Result<T> = std::result::Result<T, NetflowPluginError>;

/// Error types that can occur in netflow plugin operations
#[derive(Error, Debug)]
pub enum NetflowPluginError {
    /// Socket could not be bound to the requested address
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Transport layer error (I/O, network)
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl NetflowPluginError {
    /// Whether the error ends the receive loop that produced it.
    ///
    /// Bind errors happen before the loop starts and are always fatal.
    /// Transport errors are fatal unless the kind is one the kernel reports
    /// for a single datagram.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(err) => !is_transient_io(err),
            Self::Bind { .. } => true,
        }
    }
}

/// I/O error kinds a UDP receive loop can see without the socket being broken.
///
/// `ConnectionReset` shows up on some platforms after an ICMP port-unreachable
/// for a previously sent datagram.
pub fn is_transient_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
    )
}
