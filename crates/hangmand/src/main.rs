//! hangmand: hangman match coordinator daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use hangman_core::config::HangmanConfig;
use hangmand::ServerContext;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = HangmanConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = HangmanConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HangmanConfig::default()
    });
    config.validate().context("invalid configuration")?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        max_matches = config.server.max_matches,
        match_secs = config.game.match_secs,
        "hangmand starting"
    );

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    let ctx = ServerContext::new(&config);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let serve_task = tokio::spawn(hangmand::serve(
        listener,
        ctx.clone(),
        shutdown_tx.subscribe(),
    ));

    let match_printer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let open = ctx.registry.snapshot().await;
                tracing::info!(
                    open = open.len(),
                    channels_in_use = ctx.registry.allocator().in_use(),
                    players = ctx.directory.len(),
                    "match table snapshot"
                );
                for (i, m) in open.iter().enumerate() {
                    tracing::info!(index = i + 1, "  match {m}");
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = serve_task         => tracing::error!("handshake listener exited: {:?}", r),
        r = match_printer      => tracing::error!("match printer exited: {:?}", r),
    }

    Ok(())
}
