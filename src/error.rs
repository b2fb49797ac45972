//! Error taxonomy for the tunnel connection lifecycle and pool supervisor.

use std::io;

use thiserror::Error;

/// A terminal outcome of a single tunnel session, per spec §3 and §7.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not reach `remoteHost:remotePort`.
    #[error("failed to dial remote {0}:{1}: {2}")]
    RemoteDialError(String, u16, #[source] io::Error),

    /// Remote dial was refused by the peer.
    #[error("connection to remote {0}:{1} refused")]
    ConnectionRefused(String, u16),

    /// The auth deadline elapsed before a definitive indicator arrived.
    #[error("authentication timed out after {0:?}")]
    AuthTimeout(std::time::Duration),

    /// The remote explicitly rejected authentication.
    #[error("authentication rejected by remote")]
    AuthRejected,

    /// The remote socket errored or closed before a definitive auth indicator.
    #[error("transport error during authentication: {0}")]
    AuthTransportError(#[source] io::Error),

    /// Malformed or oversized control data was seen before `READY`.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The remote closed before reaching a required state.
    #[error("connection closed prematurely before reaching required state")]
    PrematureClose,

    /// Could not open the local connection.
    #[error("failed to dial local {0}:{1}: {2}")]
    LocalDialError(String, u16, #[source] io::Error),

    /// The local connection was refused by the local server.
    #[error("connection to local {0}:{1} refused")]
    LocalConnectionRefused(String, u16),

    /// The local connection could not be configured (e.g. bad cert/key files).
    #[error("local connection misconfigured: {0}")]
    LocalConfigError(String),

    /// An I/O error occurred mid-splice.
    #[error("I/O error during splice: {0}")]
    IoError(#[source] io::Error),
}

impl SessionError {
    /// True if this error's underlying `io::ErrorKind` is `ConnectionRefused`.
    pub fn is_connection_refused(error: &io::Error) -> bool {
        error.kind() == io::ErrorKind::ConnectionRefused
    }
}

/// Errors from acquiring a rendezvous [`crate::endpoint::Endpoint`] from the
/// control-plane service. Retried by the caller per spec §4.G / §7.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to reach control-plane service: {0}")]
    Request(#[from] reqwest::Error),

    #[error("control-plane service returned an error status: {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to decode control-plane response: {0}")]
    Decode(#[source] reqwest::Error),
}
