//! Remote authenticator (spec §4.B): sends an auth frame, awaits a
//! success/failure indicator within a deadline.

use std::{io, sync::OnceLock, time::Duration};

use regex::Regex;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::line_reader::LineReader;
use crate::config::SecretKey;
use crate::error::SessionError;

fn status_ok_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(?i)"status"\s*:\s*"ok""#).expect("valid regex"))
}

fn status_error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"(?i)"status"\s*:\s*"error""#).expect("valid regex"))
}

/// Authenticate on an already-connected duplex. If `secret_key` is absent,
/// succeeds immediately without any I/O (spec §4.B).
///
/// Returns whatever bytes followed the auth indicator's line terminator in
/// the same read — these may already contain `PING`/`READY` control lines
/// (routine over real TCP, which has no message boundaries) and must be
/// handed, raw and unparsed, to [`super::ready::wait_for_ready`] rather than
/// discarded.
pub async fn authenticate<S>(
    stream: &mut S,
    secret_key: Option<&SecretKey>,
    auth_timeout: Duration,
) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let secret_key = match secret_key {
        None => return Ok(Vec::new()),
        Some(key) => key,
    };

    let frame = json!({ "type": "auth", "key": secret_key.as_str() });
    let mut line = serde_json::to_vec(&frame)
        .expect("auth frame is always representable as JSON");
    line.push(b'\n');

    stream
        .write_all(&line)
        .await
        .map_err(SessionError::AuthTransportError)?;
    stream
        .flush()
        .await
        .map_err(SessionError::AuthTransportError)?;
    debug!("sent auth frame; awaiting indicator");

    match timeout(auth_timeout, wait_for_indicator(stream)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(SessionError::AuthTimeout(auth_timeout)),
    }
}

/// Extract the auth indicator one line at a time via [`LineReader`] so that
/// trailing bytes received in the same read (further control lines, or
/// already-opaque payload) are preserved rather than folded into the
/// candidate string and lost.
async fn wait_for_indicator<S>(stream: &mut S) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = LineReader::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(SessionError::AuthTransportError)?;
        if n == 0 {
            return Err(SessionError::AuthTransportError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before an authentication indicator arrived",
            )));
        }

        let mut next = reader.feed_one(&buf[..n])?;
        while let Some(line) = next {
            trace!(%line, "received candidate auth indicator line");
            if let Some(verdict) = classify_indicator(&line) {
                return verdict.map(|()| reader.take_residue());
            }
            // Not a recognized indicator; keep draining any further lines
            // already buffered from this read before waiting on the socket
            // again.
            next = reader.feed_one(&[])?;
        }
    }
}

/// Classify a stripped indicator string per spec §4.B / §6. Returns `None`
/// if the string is not a recognized indicator (waiter should keep reading).
fn classify_indicator(trimmed: &str) -> Option<Result<(), SessionError>> {
    if trimmed == "AUTH_OK" || trimmed == "AUTH_SUCCESS" {
        return Some(Ok(()));
    }
    if status_ok_pattern().is_match(trimmed) {
        return Some(Ok(()));
    }
    if trimmed == "AUTH_FAIL" {
        return Some(Err(SessionError::AuthRejected));
    }
    if status_error_pattern().is_match(trimmed) {
        return Some(Err(SessionError::AuthRejected));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn skips_io_when_no_secret_key() {
        let (mut client, _server) = duplex(64);
        let residue = authenticate(&mut client, None, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(residue.is_empty());
    }

    #[tokio::test]
    async fn succeeds_on_auth_ok() {
        let (mut client, mut server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let handle = tokio::spawn(async move {
            authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await
        });

        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.contains(r#""type":"auth""#));
        assert!(sent.contains(r#""key":"s""#));

        server.write_all(b"AUTH_OK\n").await.unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn succeeds_on_status_ok_json_with_whitespace() {
        let (mut client, mut server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let handle = tokio::spawn(async move {
            authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await
        });
        let mut buf = vec![0u8; 1024];
        server.read(&mut buf).await.unwrap();
        server
            .write_all(b"{\"status\"  :  \"OK\"}")
            .await
            .unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn fails_on_auth_fail() {
        let (mut client, mut server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let handle = tokio::spawn(async move {
            authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await
        });
        let mut buf = vec![0u8; 1024];
        server.read(&mut buf).await.unwrap();
        server.write_all(b"AUTH_FAIL\n").await.unwrap();
        assert!(matches!(
            handle.await.unwrap(),
            Err(SessionError::AuthRejected)
        ));
    }

    #[tokio::test]
    async fn times_out_when_silent() {
        let (mut client, _server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let result = authenticate(&mut client, Some(&secret), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(SessionError::AuthTimeout(_))));
    }

    #[tokio::test]
    async fn transport_error_on_premature_close() {
        let (mut client, server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        drop(server);
        let result = authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await;
        assert!(matches!(result, Err(SessionError::AuthTransportError(_))));
    }

    #[tokio::test]
    async fn ignores_unrecognized_chunks_before_indicator() {
        let (mut client, mut server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let handle = tokio::spawn(async move {
            authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await
        });
        let mut buf = vec![0u8; 1024];
        server.read(&mut buf).await.unwrap();
        server.write_all(b"banner text\n").await.unwrap();
        tokio::task::yield_now().await;
        server.write_all(b"AUTH_OK\n").await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn carries_forward_bytes_received_alongside_the_indicator() {
        // Real TCP has no message boundaries: the indicator and everything
        // that follows it (here, spec.md §8 scenario 2's PING/PING/READY/DATA)
        // routinely arrive in a single read. Those trailing bytes must come
        // back as residue rather than being folded into the indicator string
        // and discarded.
        let (mut client, mut server) = duplex(1024);
        let secret = SecretKey::from("s".to_string());
        let handle = tokio::spawn(async move {
            authenticate(&mut client, Some(&secret), Duration::from_millis(200)).await
        });
        let mut buf = vec![0u8; 1024];
        server.read(&mut buf).await.unwrap();
        server
            .write_all(b"AUTH_OK\nPING\nPING\nREADY\nDATA")
            .await
            .unwrap();

        let residue = handle.await.unwrap().unwrap();
        assert_eq!(residue, b"PING\nPING\nREADY\nDATA");
    }
}
