//! relaydrive gateway: serves decrypted files and byte ranges out of chunked attachments
//!
//! Manifests come from a catalog directory, chunk ciphertext from the attachment host.
//! Configuration is read from a toml file and can be overridden on the command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use service::config::CONFIG_FILE_NAME;
use service::http::HttpServerError;
use service::{Config, ServiceState};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// relaydrive gateway: stream decrypted files and byte ranges over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the toml config file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Port to listen on, keeping the configured interface
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of `<file_id>.json` manifests
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Chunks fetched ahead of the reader per stream
    #[arg(short, long)]
    window: Option<usize>,
}

impl Args {
    /// Config file if present, defaults otherwise, with flags applied on top
    fn load_config(&self) -> Result<Config> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        if let Some(port) = self.port {
            config.listen_addr = SocketAddr::new(config.listen_addr.ip(), port);
        }
        if let Some(catalog) = &self.catalog {
            config.catalog_dir = catalog.clone();
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(window) = self.window {
            config.engine.window = window;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config().context("failed to load configuration")?;

    // Initialize tracing
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level().into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    let code = serve(&args, config).await;
    // Exiting skips destructors; flush buffered log lines first
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Run the gateway until shutdown, returning the process exit code
async fn serve(args: &Args, config: Config) -> i32 {
    register_panic_logger();
    service::version::report_build_info();
    if !args.config.exists() {
        tracing::info!(path = %args.config.display(), "no config file, using defaults");
    }

    let state = match ServiceState::from_config(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to create service state: {}", e);
            return 3;
        }
    };

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                tracing::error!("failed to listen for ctrl+c: {}", e);
                // keep the sender alive so the server isn't told to stop
                std::future::pending::<()>().await;
            }
        }
    });

    let signal_rx = shutdown_rx.clone();
    let server = tokio::spawn(service::http::run(
        config.listen_addr,
        config.log_level(),
        state,
        shutdown_rx,
    ));

    let code = wait_for_server(server, signal_rx, FINAL_SHUTDOWN_TIMEOUT).await;
    if code == 0 {
        tracing::info!("gateway shutdown complete");
    }
    code
}

/// Wait for the server to stop on its own, or for up to `grace` once shutdown is signalled.
/// Open streams may hold the server up past the signal.
async fn wait_for_server(
    mut server: JoinHandle<Result<(), HttpServerError>>,
    mut signal_rx: watch::Receiver<()>,
    grace: Duration,
) -> i32 {
    let result = tokio::select! {
        result = &mut server => result,
        Ok(()) = signal_rx.changed() => {
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!("failed to shut down within {} seconds", grace.as_secs());
                    server.abort();
                    return 4;
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            tracing::error!("HTTP server error: {}", e);
            4
        }
        Err(e) => {
            tracing::error!("HTTP server task failed: {}", e);
            4
        }
    }
}

/// Registers a panic hook that logs panics using the `tracing` crate
fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}
