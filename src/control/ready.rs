//! Ready waiter (spec §4.C): consumes control lines until `READY`, answers
//! `PING` with `PONG`, and returns the residual bytes received after `READY`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::line_reader::LineReader;
use crate::error::SessionError;

/// Wait for the `READY` control line on `stream`, answering any `PING`s
/// along the way. `initial` seeds the reader with bytes already received in
/// an earlier phase (e.g. residue carried forward from
/// [`super::auth::authenticate`] when the auth indicator shared a read with
/// subsequent control lines) and is processed before anything further is
/// read from the socket. Returns whatever bytes followed `READY`'s
/// terminating LF (possibly empty) — these must be the first bytes
/// delivered into the local socket (spec §3's residue invariant).
pub async fn wait_for_ready<S>(stream: &mut S, initial: &[u8]) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = LineReader::new();
    let mut buf = [0u8; 4096];

    let lines = reader.feed(initial)?;
    if let Some(residue) = process_lines(lines, &mut reader, stream).await? {
        return Ok(residue);
    }

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(SessionError::AuthTransportError)?;
        if n == 0 {
            return Err(SessionError::PrematureClose);
        }

        let lines = reader.feed(&buf[..n])?;
        if let Some(residue) = process_lines(lines, &mut reader, stream).await? {
            return Ok(residue);
        }
    }
}

/// Apply the READY/PING control-line rules to a batch of already-resolved
/// lines. Returns `Some(residue)` once `READY` resolves, `None` if more data
/// is needed.
async fn process_lines<S>(
    lines: Vec<String>,
    reader: &mut LineReader,
    stream: &mut S,
) -> Result<Option<Vec<u8>>, SessionError>
where
    S: AsyncWrite + Unpin,
{
    for line in lines {
        match line.as_str() {
            "READY" => {
                debug!("received READY");
                return Ok(Some(reader.take_residue()));
            }
            "PING" => {
                trace!("received PING, replying PONG");
                stream
                    .write_all(b"PONG\n")
                    .await
                    .map_err(SessionError::AuthTransportError)?;
                stream
                    .flush()
                    .await
                    .map_err(SessionError::AuthTransportError)?;
            }
            _ => {
                // Buffering under the cap continues; line_reader enforces
                // the 64 KiB cap itself and will error via `feed` above.
            }
        }
    }
    Ok(None)
}
