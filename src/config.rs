//! Configuration types for a tunnel connection: [`TunnelConfig`] (spec §3) and
//! [`LocalConnectConfig`] (spec §3, consumed by [`crate::local`]).

use std::{fmt, fmt::Debug, path::PathBuf, sync::Arc, time::Duration};

/// The method and path observed on the first whitespace-delimited token pair
/// of the first chunk of data forwarded to the local side, per spec §3/§4.F.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestObserved {
    pub method: String,
    pub path: String,
}

/// Sink for [`RequestObserved`] events. Passive: never alters data in flight.
pub type OnRequest = Arc<dyn Fn(RequestObserved) + Send + Sync>;

/// Per-connection configuration for a tunnel session (spec §3).
#[derive(Clone)]
pub struct TunnelConfig {
    pub remote_host: String,
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub secret_key: Option<SecretKey>,
    /// Deadline for the auth phase (spec §4.B); default 5000ms.
    pub auth_timeout: Duration,
    pub on_request: Option<OnRequest>,
}

impl TunnelConfig {
    pub fn new(
        remote_host: impl Into<String>,
        remote_port: u16,
        local_host: impl Into<String>,
        local_port: u16,
    ) -> Self {
        TunnelConfig {
            remote_host: remote_host.into(),
            remote_port,
            local_host: local_host.into(),
            local_port,
            secret_key: None,
            auth_timeout: Duration::from_millis(5000),
            on_request: None,
        }
    }

    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(SecretKey(secret_key.into()));
        self
    }

    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    pub fn with_on_request(mut self, on_request: OnRequest) -> Self {
        self.on_request = Some(on_request);
        self
    }

    /// True when the configured local host is neither `localhost` nor
    /// `127.0.0.1` and therefore requires the Host-header rewrite (spec §3).
    pub fn needs_host_rewrite(&self) -> bool {
        self.local_host != "localhost" && self.local_host != "127.0.0.1"
    }
}

impl Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("local_host", &self.local_host)
            .field("local_port", &self.local_port)
            .field("secret_key", &self.secret_key)
            .field("auth_timeout", &self.auth_timeout)
            .field("on_request", &self.on_request.is_some())
            .finish()
    }
}

/// A secret key whose `Debug` impl never reveals its contents (spec §4.B,
/// §7: "the secret key must never be logged").
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretKey {
    fn from(s: String) -> Self {
        SecretKey(s)
    }
}

impl Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Configuration for the local-leg connection (spec §3/§4.E).
#[derive(Debug, Clone)]
pub struct LocalConnectConfig {
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub allow_invalid_cert: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
}

impl LocalConnectConfig {
    /// The configuration always used by a tunnel session per spec §4.F step
    /// 4: plain TCP, trust disabled if TLS were ever enabled. The local leg
    /// is deliberately permissive because it targets the operator's own
    /// machine.
    pub fn for_session(host: impl Into<String>, port: u16) -> Self {
        LocalConnectConfig {
            host: host.into(),
            port,
            https: false,
            allow_invalid_cert: true,
            cert_file: None,
            key_file: None,
            ca_file: None,
        }
    }
}
