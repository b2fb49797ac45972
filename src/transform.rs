//! Host-header transformer (spec §4.D): a one-shot byte-stream rewrite that
//! replaces the first HTTP `Host:` header value.

use std::sync::OnceLock;

use regex::bytes::Regex;

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\r\n[Hh]ost: \S+").expect("valid regex"))
}

/// Rewrites the first `Host:` header it observes to `replacement_host`, then
/// degrades to a pure passthrough (spec §4.D, §3's "at-most-one rewrite"
/// invariant).
///
/// If a `Host:` line straddles a chunk boundary, the substitution does not
/// fire on that chunk; this is the documented, accepted behavior (spec §9).
pub struct HostRewriter {
    replacement_host: String,
    replaced: bool,
}

impl HostRewriter {
    pub fn new(replacement_host: impl Into<String>) -> Self {
        HostRewriter {
            replacement_host: replacement_host.into(),
            replaced: false,
        }
    }

    /// Apply the transform to one chunk, returning the (possibly rewritten)
    /// bytes to forward onward.
    pub fn transform(&mut self, chunk: &[u8]) -> Vec<u8> {
        if self.replaced {
            return chunk.to_vec();
        }

        let replacement = format!("\r\nHost: {}", self.replacement_host);
        let rewritten = host_pattern().replace(chunk, replacement.as_bytes().to_vec());

        if let std::borrow::Cow::Owned(_) = rewritten {
            self.replaced = true;
        }

        rewritten.into_owned()
    }

    pub fn has_replaced(&self) -> bool {
        self.replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_first_host_header() {
        let mut rewriter = HostRewriter::new("internal.example");
        let input = b"GET / HTTP/1.1\r\nHost: public.example\r\n\r\n";
        let output = rewriter.transform(input);
        assert_eq!(
            output,
            b"GET / HTTP/1.1\r\nHost: internal.example\r\n\r\n".to_vec()
        );
        assert!(rewriter.has_replaced());
    }

    #[test]
    fn only_rewrites_once_across_chunks() {
        let mut rewriter = HostRewriter::new("internal.example");
        let first = rewriter.transform(b"GET / HTTP/1.1\r\nHost: public.example\r\n\r\n");
        assert!(first.ends_with(b"Host: internal.example\r\n\r\n"));

        // A second request pipelined on the same connection must pass
        // through unchanged.
        let second =
            rewriter.transform(b"GET /two HTTP/1.1\r\nHost: public.example\r\n\r\n");
        assert_eq!(
            second,
            b"GET /two HTTP/1.1\r\nHost: public.example\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn passthrough_when_no_host_header_present() {
        let mut rewriter = HostRewriter::new("internal.example");
        let output = rewriter.transform(b"raw bytes with no host header");
        assert_eq!(output, b"raw bytes with no host header".to_vec());
        assert!(!rewriter.has_replaced());
    }

    #[test]
    fn does_not_fire_when_host_line_splits_across_chunks() {
        let mut rewriter = HostRewriter::new("internal.example");
        // The `Host:` token itself is split across this single call's input,
        // so the regex (operating on one chunk at a time) will not match.
        let output = rewriter.transform(b"GET / HTTP/1.1\r\nHo");
        assert_eq!(output, b"GET / HTTP/1.1\r\nHo".to_vec());
        assert!(!rewriter.has_replaced());
    }
}
