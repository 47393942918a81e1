//! termgate binary: serve the configured program to SSH clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use termgate::config::{ConfigLoader, EnvConfig, GatewayConfig, LogFormat};
use termgate::ssh::{GatewayServer, bind, load_or_generate_host_key};
use termgate::{Accountant, GatewayMetrics, Result, SessionHandler};
use tokio_util::sync::CancellationToken;

/// SSH gateway to an interactive terminal program
#[derive(Parser, Debug)]
#[command(name = "termgate", version, about)]
struct Cli {
    /// Configuration file (default: ./termgate.toml, then /etc/termgate/termgate.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// OpenSSH private host key
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Generate an Ed25519 host key when the file is missing
    #[arg(long)]
    generate_host_key: bool,

    /// Connection log file
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Diagnostic log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Program and arguments to run for every client
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    fn load_config(&self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => ConfigLoader::new().load(path)?,
            None => ConfigLoader::standard().load_default()?,
        };

        EnvConfig::default().apply(&mut config)?;

        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(host_key) = &self.host_key {
            config.server.host_key.clone_from(host_key);
        }
        if self.generate_host_key {
            config.server.generate_host_key = true;
        }
        if let Some(log_path) = &self.log_path {
            config.accounting.log_path.clone_from(log_path);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if !self.command.is_empty() {
            config.session.set_command_line(self.command.iter().cloned());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("termgate: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = termgate::logging::init(&config.logging) {
        eprintln!("termgate: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        command = %config.session.command,
        log_path = %config.accounting.log_path.display(),
        "starting termgate"
    );

    let host_key =
        load_or_generate_host_key(&config.server.host_key, config.server.generate_host_key)?;
    let listener = bind(config.server.listen).await?;

    let metrics = Arc::new(GatewayMetrics::new());
    let shutdown = CancellationToken::new();
    let accountant =
        Accountant::new(&config.accounting.log_path).with_metrics(Arc::clone(&metrics));
    let sessions = SessionHandler::new(
        config.session_settings(),
        accountant,
        Arc::clone(&metrics),
        shutdown.clone(),
    );

    tokio::spawn(shutdown_signal(shutdown.clone()));

    GatewayServer::new(&config.server, host_key, sessions, shutdown)
        .serve(listener)
        .await?;

    metrics.snapshot().log();
    tracing::info!("termgate stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
