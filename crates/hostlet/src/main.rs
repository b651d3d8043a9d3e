//! hostlet binary: speaks the bridge protocol on stdin/stdout.

use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostlet::{BridgeConfig, NativeLoader, ServerExit, VersionInfo, run_server};

/// Logs go to stderr: stdout carries protocol frames.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("HOSTLET_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("hostlet={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env().context("loading configuration")?;
    let loader = NativeLoader::with_builtins();
    let version = VersionInfo::new().with_native_classes(loader.classes());
    tracing::info!(
        version = %serde_json::to_string(&version).unwrap_or_default(),
        "Starting hostlet"
    );
    tracing::debug!(?config, "Configuration loaded");

    match run_server(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Arc::new(loader),
        config,
        None,
    )
    .await
    {
        Ok(ServerExit::ShutdownRequested) => tracing::info!("Exiting after shutdown request"),
        Ok(ServerExit::ControllerClosed) => tracing::info!("Exiting after controller hangup"),
        Err(e) => {
            tracing::error!(error = %e, "Fatal protocol failure");
            std::process::exit(1);
        }
    }
    Ok(())
}
