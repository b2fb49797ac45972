//! Line reader (spec §4.A): extracts newline-delimited control lines from an
//! incoming byte stream while preserving post-boundary residue.

use crate::error::SessionError;

/// Hard cap on the unresolved buffer (spec §4.A, §8's "buffer cap" property).
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Accumulates bytes and yields LF-delimited, whitespace-trimmed control
/// lines, preserving any bytes that arrive after the last line terminator.
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        LineReader { buffer: Vec::new() }
    }

    /// Feed a chunk of bytes into the reader. Returns every complete line
    /// found so far, in order, trimmed of surrounding whitespace. Bytes
    /// after the last LF in the accumulated buffer are retained for the
    /// next call (or for [`LineReader::take_residue`]).
    ///
    /// Fails with [`SessionError::ProtocolError`] if the unresolved buffer
    /// would exceed [`MAX_BUFFERED`] bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, SessionError> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
                    // Drop the trailing LF (and, if present, a preceding CR) before trimming.
                    let without_terminator = line_bytes.strip_suffix(b"\n").unwrap_or(&line_bytes);
                    let without_terminator =
                        without_terminator.strip_suffix(b"\r").unwrap_or(without_terminator);
                    let line = String::from_utf8_lossy(without_terminator).trim().to_string();
                    lines.push(line);
                }
                None => break,
            }
        }

        if self.buffer.len() > MAX_BUFFERED {
            return Err(SessionError::ProtocolError(format!(
                "unresolved buffer exceeded {} bytes without a line terminator",
                MAX_BUFFERED
            )));
        }

        Ok(lines)
    }

    /// Feed a chunk and extract at most the next resolved line, leaving any
    /// further bytes in the buffer untouched — including additional complete
    /// lines — for a later call or for a different consumer entirely (e.g.
    /// handing raw bytes off to a fresh [`LineReader`] in a later protocol
    /// phase). Pass an empty chunk to keep draining lines already buffered
    /// from a previous call without reading more from the socket.
    pub fn feed_one(&mut self, chunk: &[u8]) -> Result<Option<String>, SessionError> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > MAX_BUFFERED {
            return Err(SessionError::ProtocolError(format!(
                "unresolved buffer exceeded {} bytes without a line terminator",
                MAX_BUFFERED
            )));
        }

        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
                let without_terminator = line_bytes.strip_suffix(b"\n").unwrap_or(&line_bytes);
                let without_terminator =
                    without_terminator.strip_suffix(b"\r").unwrap_or(without_terminator);
                Ok(Some(String::from_utf8_lossy(without_terminator).trim().to_string()))
            }
            None => Ok(None),
        }
    }

    /// Bytes accumulated since the last complete line, not yet consumed.
    pub fn residue(&self) -> &[u8] {
        &self.buffer
    }

    /// Take and clear the current residue (used once a terminal line like
    /// `READY` resolves: those trailing bytes become the first payload).
    pub fn take_residue(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_trimmed_lines_and_keeps_residue() {
        let mut reader = LineReader::new();
        let lines = reader.feed(b"  READY  \nDATA").unwrap();
        assert_eq!(lines, vec!["READY".to_string()]);
        assert_eq!(reader.residue(), b"DATA");
    }

    #[test]
    fn splits_multiple_lines_in_one_chunk() {
        let mut reader = LineReader::new();
        let lines = reader.feed(b"AUTH_OK\nPING\nPING\nREADY\nDATA").unwrap();
        assert_eq!(
            lines,
            vec![
                "AUTH_OK".to_string(),
                "PING".to_string(),
                "PING".to_string(),
                "READY".to_string(),
            ]
        );
        assert_eq!(reader.residue(), b"DATA");
    }

    #[test]
    fn accumulates_across_calls() {
        let mut reader = LineReader::new();
        assert!(reader.feed(b"REA").unwrap().is_empty());
        let lines = reader.feed(b"DY\n").unwrap();
        assert_eq!(lines, vec!["READY".to_string()]);
        assert!(reader.residue().is_empty());
    }

    #[test]
    fn rejects_oversized_buffer_without_terminator() {
        let mut reader = LineReader::new();
        let junk = vec![b'x'; MAX_BUFFERED + 1];
        let err = reader.feed(&junk).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolError(_)));
    }

    #[test]
    fn strips_carriage_return() {
        let mut reader = LineReader::new();
        let lines = reader.feed(b"READY\r\n").unwrap();
        assert_eq!(lines, vec!["READY".to_string()]);
    }

    #[test]
    fn feed_one_extracts_single_line_and_preserves_the_rest_raw() {
        let mut reader = LineReader::new();
        let line = reader
            .feed_one(b"AUTH_OK\nPING\nPING\nREADY\nDATA")
            .unwrap();
        assert_eq!(line, Some("AUTH_OK".to_string()));
        // Everything after the first LF is left completely untouched,
        // including further complete lines, so a later consumer can
        // reparse them from scratch.
        assert_eq!(reader.residue(), b"PING\nPING\nREADY\nDATA");
    }

    #[test]
    fn feed_one_returns_none_without_a_terminator() {
        let mut reader = LineReader::new();
        assert_eq!(reader.feed_one(b"no newline yet").unwrap(), None);
        assert_eq!(reader.residue(), b"no newline yet");
    }

    #[test]
    fn take_residue_clears_buffer() {
        let mut reader = LineReader::new();
        reader.feed(b"READY\nhello").unwrap();
        let residue = reader.take_residue();
        assert_eq!(residue, b"hello");
        assert!(reader.residue().is_empty());
    }
}
