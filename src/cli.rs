//! Command-line interface (spec §6): flags for the control-plane URL, the
//! local port to forward to, and pool/retry tuning.

use std::time::Duration;

use structopt::StructOpt;

/// Tunnel client configuration supplied on the command line or via
/// environment fallback (`TNNLR_API_KEY`).
#[derive(Debug, StructOpt)]
#[structopt(name = "tnnlr", about = "Expose a local server through a tnnlr tunnel")]
pub struct Cli {
    /// Local port to forward traffic to. Must be in 1-65535.
    #[structopt(long, parse(try_from_str = parse_port))]
    pub port: u16,

    /// Control-plane URL used to acquire a rendezvous endpoint.
    #[structopt(long)]
    pub url: String,

    /// API key sent as `Authorization: Bearer <api-key>` to the control plane.
    #[structopt(long, env = "TNNLR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Host the local server is listening on.
    #[structopt(long, default_value = "localhost")]
    pub local_host: String,

    /// Write the assigned public URL to this file (not implemented in this
    /// core; see `main`'s startup log for details).
    #[structopt(long, parse(from_os_str))]
    pub url_file: Option<std::path::PathBuf>,

    /// Number of concurrent tunnel connections to maintain.
    #[structopt(long, default_value = "10")]
    pub max_connections: usize,

    /// Number of additional endpoint-acquisition attempts after the first.
    #[structopt(long, default_value = "3")]
    pub retry: u32,

    /// Delay between endpoint-acquisition retries, in seconds.
    #[structopt(long, default_value = "5.0")]
    pub retry_delay: f64,
}

impl Cli {
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u32 = s.parse().map_err(|_| format!("invalid port: {}", s))?;
    if port == 0 || port > 65535 {
        Err(format!("port must be between 1 and 65535, got {}", port))
    } else {
        Ok(port as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_port_zero() {
        assert!(parse_port("0").is_err());
    }

    #[test]
    fn rejects_port_above_range() {
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn accepts_valid_port() {
        assert_eq!(parse_port("8080"), Ok(8080));
    }

    #[test]
    fn parses_required_flags() {
        let cli = Cli::from_iter(&["tnnlr", "--port", "3000", "--url", "https://tnnlr.example/api"]);
        assert_eq!(cli.port, 3000);
        assert_eq!(cli.local_host, "localhost");
        assert_eq!(cli.max_connections, 10);
        assert_eq!(cli.retry, 3);
        assert_eq!(cli.retry_delay_duration(), Duration::from_secs_f64(5.0));
    }
}
