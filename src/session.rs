//! Tunnel session (spec §4.F): composes authentication, the READY wait,
//! local connection, and bidirectional byte splicing with an optional
//! Host-header rewrite, reporting a single terminal outcome.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::config::{LocalConnectConfig, OnRequest, RequestObserved, TunnelConfig};
use crate::control::{auth, ready};
use crate::error::SessionError;
use crate::local::{self, IoStream};
use crate::transform::HostRewriter;

const SPLICE_CHUNK: usize = 16 * 1024;

/// Explicit session states per spec §3. Used only for tracing/diagnostics;
/// the externally observable result of a run is a single `Result<(), SessionError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Dial,
    Auth,
    AwaitReady,
    LocalDial,
    Splicing,
}

/// Run one tunnel connection end-to-end: dial, authenticate, await READY,
/// connect locally, then splice until either side closes or errors.
///
/// Returns `Ok(())` when the session completed by the remote closing
/// cleanly; returns `Err` for any failure in any phase. In all cases, both
/// sockets are closed before this function returns (spec §3's cleanup
/// invariant).
pub async fn run(tunnel: &TunnelConfig) -> Result<(), SessionError> {
    let mut state = State::Dial;
    debug!(?state, remote = %format!("{}:{}", tunnel.remote_host, tunnel.remote_port), "dialing remote");

    let mut remote = dial_remote(&tunnel.remote_host, tunnel.remote_port).await?;

    state = State::Auth;
    debug!(?state, "authenticating");
    let auth_residue = match auth::authenticate(&mut remote, tunnel.secret_key.as_ref(), tunnel.auth_timeout).await {
        Ok(residue) => residue,
        Err(e) => {
            let _ = remote.shutdown().await;
            return Err(e);
        }
    };

    state = State::AwaitReady;
    debug!(?state, "awaiting READY");
    let residue = match ready::wait_for_ready(&mut remote, &auth_residue).await {
        Ok(residue) => residue,
        Err(e) => {
            let _ = remote.shutdown().await;
            return Err(e);
        }
    };

    state = State::LocalDial;
    debug!(?state, local = %format!("{}:{}", tunnel.local_host, tunnel.local_port), "dialing local server");
    let local_config = LocalConnectConfig::for_session(tunnel.local_host.clone(), tunnel.local_port);
    let local_stream = match local::connect_local(&local_config).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = remote.shutdown().await;
            return Err(e);
        }
    };
    info!("local connection established");

    state = State::Splicing;
    debug!(?state, "splicing");
    splice(remote, local_stream, residue, tunnel).await
}

/// Dial `host:port` over TCP with keep-alive enabled (spec §4.F step 1),
/// trying every resolved address in turn, as the teacher's
/// `transport::client::connect` does.
async fn dial_remote(host: &str, port: u16) -> Result<TcpStream, SessionError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SessionError::RemoteDialError(host.to_string(), port, e))?;

    let mut last_error = None;
    loop {
        let addr = match addrs.next() {
            Some(addr) => addr,
            None => {
                let err = last_error.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
                });
                return Err(if SessionError::is_connection_refused(&err) {
                    SessionError::ConnectionRefused(host.to_string(), port)
                } else {
                    SessionError::RemoteDialError(host.to_string(), port, err)
                });
            }
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| SessionError::RemoteDialError(host.to_string(), port, e))?;
        let _ = socket.set_keepalive(true);

        match socket.connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
}

fn request_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w+) (\S+)").expect("valid regex"))
}

/// Inspect a chunk for an HTTP-style request line (spec §4.F point 6). Only
/// the very first call does any work; subsequent calls are no-ops. This
/// observation never consumes or alters the bytes.
fn inspect_first_chunk(chunk: &[u8], on_request: &Option<OnRequest>, inspected: &mut bool) {
    if *inspected {
        return;
    }
    *inspected = true;

    let Some(on_request) = on_request else {
        return;
    };
    let text = String::from_utf8_lossy(chunk);
    if let Some(captures) = request_line_pattern().captures(&text) {
        let method = captures[1].to_string();
        let path = captures[2].to_string();
        on_request(RequestObserved { method, path });
    }
}

/// Bidirectional splice (spec §4.F steps 5-8): two independent copy loops,
/// the remote→local direction optionally passing through the Host-header
/// transformer, joined so that either side's terminal condition closes both
/// sockets.
async fn splice(
    remote: TcpStream,
    local_stream: IoStream,
    residue: Vec<u8>,
    tunnel: &TunnelConfig,
) -> Result<(), SessionError> {
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);
    let (mut local_read, mut local_write) = tokio::io::split(local_stream);

    let mut rewriter = if tunnel.needs_host_rewrite() {
        Some(HostRewriter::new(tunnel.local_host.clone()))
    } else {
        None
    };
    let on_request = tunnel.on_request.clone();
    let mut inspected_first_chunk = false;

    // The post-READY residue must be the first bytes delivered to the local
    // socket (spec §3's residue invariant), ahead of anything else.
    if !residue.is_empty() {
        inspect_first_chunk(&residue, &on_request, &mut inspected_first_chunk);
        let forwarded = match rewriter.as_mut() {
            Some(r) => r.transform(&residue),
            None => residue,
        };
        if let Err(e) = local_write.write_all(&forwarded).await {
            let _ = remote_write.shutdown().await;
            let _ = local_write.shutdown().await;
            return Err(classify_local_error(e, tunnel));
        }
    }

    let remote_to_local = async {
        let mut buf = vec![0u8; SPLICE_CHUNK];
        loop {
            let n = remote_read
                .read(&mut buf)
                .await
                .map_err(|e| classify_remote_error(e, tunnel))?;
            if n == 0 {
                // Remote closed: the session completes normally (spec §4.F
                // terminal conditions).
                return Ok(());
            }
            inspect_first_chunk(&buf[..n], &on_request, &mut inspected_first_chunk);
            let forwarded = match rewriter.as_mut() {
                Some(r) => r.transform(&buf[..n]),
                None => buf[..n].to_vec(),
            };
            local_write
                .write_all(&forwarded)
                .await
                .map_err(|e| classify_local_error(e, tunnel))?;
        }
    };

    let local_to_remote = async {
        let mut buf = vec![0u8; SPLICE_CHUNK];
        loop {
            let n = local_read
                .read(&mut buf)
                .await
                .map_err(|e| classify_local_error(e, tunnel))?;
            if n == 0 {
                // Local close alone does not fail the session; the remote
                // side, if still open, will eventually close too (spec
                // §4.F terminal conditions).
                return Ok(());
            }
            remote_write
                .write_all(&buf[..n])
                .await
                .map_err(|e| classify_remote_error(e, tunnel))?;
        }
    };

    tokio::pin!(remote_to_local);
    tokio::pin!(local_to_remote);

    let mut local_to_remote_done = false;
    let outcome = loop {
        tokio::select! {
            result = &mut remote_to_local => {
                break result;
            }
            result = &mut local_to_remote, if !local_to_remote_done => {
                match result {
                    Ok(()) => {
                        warn!("local connection closed; remote side still open");
                        local_to_remote_done = true;
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };

    let _ = remote_write.shutdown().await;
    let _ = local_write.shutdown().await;

    outcome
}

fn classify_remote_error(e: std::io::Error, tunnel: &TunnelConfig) -> SessionError {
    if SessionError::is_connection_refused(&e) {
        SessionError::ConnectionRefused(tunnel.remote_host.clone(), tunnel.remote_port)
    } else {
        SessionError::IoError(e)
    }
}

fn classify_local_error(e: std::io::Error, tunnel: &TunnelConfig) -> SessionError {
    if SessionError::is_connection_refused(&e) {
        SessionError::LocalConnectionRefused(tunnel.local_host.clone(), tunnel.local_port)
    } else {
        SessionError::IoError(e)
    }
}
