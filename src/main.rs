use std::sync::Arc;

use structopt::StructOpt;
use tokio::sync::watch;
use tracing::{info, warn};

use tnnlr::cli::Cli;
use tnnlr::config::TunnelConfig;
use tnnlr::{endpoint, pool};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::from_args();

    if let Some(url_file) = &cli.url_file {
        warn!(path = %url_file.display(), "--url-file was given, but persisting the assigned URL to a file is not implemented in this core");
    }

    let http_client = reqwest::Client::new();
    let endpoint = endpoint::acquire_endpoint_with_retry(
        &http_client,
        &cli.url,
        cli.port,
        cli.api_key.as_deref(),
        cli.retry,
        cli.retry_delay_duration(),
    )
    .await?;

    info!(url = %endpoint.url, "assigned tunnel URL");

    let remote_host = endpoint.host.clone().unwrap_or_else(|| {
        http::Uri::try_from(endpoint.url.as_str())
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| endpoint.url.clone())
    });

    let tunnel = Arc::new(
        TunnelConfig::new(remote_host, endpoint.port, cli.local_host.clone(), cli.port)
            .with_secret_key(endpoint.secret_key.clone()),
    );

    let slot_count = if endpoint.max_conn_count > 0 {
        endpoint.max_conn_count as usize
    } else {
        cli.max_connections
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool_handle = tokio::spawn(pool::run(tunnel, slot_count, shutdown_rx));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, notifying sessions");
    let _ = shutdown_tx.send(true);

    // `pool::run` already bounds its own shutdown wait to a single grace
    // period across every slot; nothing further to enforce here.
    let _ = pool_handle.await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
