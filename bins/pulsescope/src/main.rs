use anyhow::Context;
use pulsescope_config::BridgeConfig;
use pulsescope_engine::{Bridge, OriginPolicy, ProcHostProbe, serve};
use pulsescope_shm::Segment;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => BridgeConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let segment = attach(&config).await?;
    let bridge = Arc::new(Bridge::new(
        segment,
        config.serial_port.clone(),
        Box::new(ProcHostProbe::default()),
    ));
    let health = bridge.health();
    tracing::info!(
        path = %config.shm_path,
        version = health.version,
        header_valid = bridge.header_valid(),
        "segment attached"
    );

    let addr = config.listen_socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        bridge,
        Arc::new(OriginPolicy::new(config.allowed_origins.clone())),
        shutdown.clone(),
    ));

    wait_for_signal().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    server.await.context("server task")?;
    Ok(())
}

/// Attach to the producer's segment, waiting for it to appear.
async fn attach(config: &BridgeConfig) -> anyhow::Result<Segment> {
    let mut attempt = 1;
    loop {
        match Segment::attach(&config.shm_path) {
            Ok(segment) => return Ok(segment),
            Err(e) if attempt < config.attach_attempts => {
                tracing::warn!(
                    attempt,
                    of = config.attach_attempts,
                    error = %e,
                    "segment not available yet"
                );
                attempt += 1;
                tokio::time::sleep(config.attach_backoff()).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("attaching {} after {attempt} attempts", config.shm_path)
                });
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
}
