// # dnsupdater - DNS Updater
//
// Thin command-line layer over dnsupdater-core:
//
// 1. Registering the compiled-in updaters
// 2. Loading the YAML configuration
// 3. Applying one update per target, or serving the HTTP update listener
//
// ## Usage
//
// ```bash
// dnsupdater default:///example.com/10.0.0.1
// dnsupdater -t powerdns ssh://dns.example.com:123/example.org/client
// dnsupdater -s http://0.0.0.0:8245
// ```
//
// ## Logging
//
// - `DNSUPDATER_LOG_LEVEL`: trace, debug, info (default), warn, error

use clap::{CommandFactory, FromArgMatches, Parser};
use dnsupdater_core::{Config, Dispatcher, DnsUpdater, UpdaterRegistry};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Clean exit
/// - 1: Configuration, startup or update error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DnsUpdaterExitCode {
    /// All updates applied, or the listener shut down cleanly
    CleanShutdown = 0,
    /// Configuration error, startup failure or failed update
    Failure = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DnsUpdaterExitCode> for ExitCode {
    fn from(code: DnsUpdaterExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Command-line options
#[derive(Debug, Parser)]
#[command(name = "dnsupdater", version, about = "Update DNS records through pluggable updaters")]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Target protocol (useful for SSH)
    #[arg(short = 't', long = "target", value_name = "PROTOCOL")]
    protocol: Option<String>,

    /// Serve/handle HTTP
    #[arg(short = 's', long = "serve")]
    serve: bool,

    /// Targets to update, or the listen address with --serve
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,
}

impl Cli {
    /// Parse the command line, listing the registered protocols in `--help`
    fn parse_with(registry: &UpdaterRegistry) -> Self {
        let help = format!(
            "Supported targets are: {}\n\
             Target examples:\n\
             * default:///example.com/10.0.0.1\n\
             * ssh://dns.example.com:123/example.org/client\n\
             * http://example.org/dns.example.com/127.0.0.1,192.168.1.1",
            registry.list_updaters().join(", ")
        );

        let matches = Cli::command().after_help(help).get_matches();
        Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }
}

/// Registry with every compiled-in updater
fn build_registry() -> UpdaterRegistry {
    let registry = UpdaterRegistry::new();

    #[cfg(feature = "http")]
    dnsupdater_http::register(&registry);

    #[cfg(feature = "ssh")]
    dnsupdater_ssh::register(&registry);

    #[cfg(feature = "powerdns")]
    dnsupdater_powerdns::register(&registry);

    registry
}

fn log_level() -> Result<Level, String> {
    let level = env::var("DNSUPDATER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "DNSUPDATER_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        )),
    }
}

fn main() -> ExitCode {
    let registry = build_registry();
    let cli = Cli::parse_with(&registry);

    let log_level = match log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DnsUpdaterExitCode::Failure.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DnsUpdaterExitCode::Failure.into();
    }

    let config = match Config::load(Some(&cli.config), registry.default_settings()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DnsUpdaterExitCode::Failure.into();
        }
    };

    if let Err(e) = config.validate(&registry) {
        eprintln!("Configuration validation error: {}", e);
        return DnsUpdaterExitCode::Failure.into();
    }

    match config.source() {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file, using defaults"),
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DnsUpdaterExitCode::RuntimeError.into();
        }
    };

    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(config)).with_cancellation(cancel.clone());

    let result = rt.block_on(async {
        tokio::spawn(async move {
            match wait_for_shutdown().await {
                Ok(signal) => info!("Received {}, cancelling", signal),
                Err(e) => error!("Signal handling failed: {}", e),
            }
            cancel.cancel();
        });

        if cli.serve {
            serve_updates(&cli, dispatcher).await
        } else {
            apply_updates(&cli, dispatcher).await
        }
    });

    result.into()
}

/// Apply every target in order, stopping at the first failure
async fn apply_updates(cli: &Cli, dispatcher: Dispatcher) -> DnsUpdaterExitCode {
    let updater = DnsUpdater::new(dispatcher);

    for target in &cli.targets {
        if let Err(e) = updater.update(target, cli.protocol.as_deref()).await {
            eprintln!("{}", e);
            return DnsUpdaterExitCode::Failure;
        }
        println!("Updated {}", target);
    }

    DnsUpdaterExitCode::CleanShutdown
}

/// Serve the HTTP update listener until cancelled
#[cfg(feature = "http")]
async fn serve_updates(cli: &Cli, dispatcher: Dispatcher) -> DnsUpdaterExitCode {
    use dnsupdater_core::{UpdateRequest, target};

    let mut params = UpdateRequest::default();
    if let Some(listen) = cli.targets.first() {
        match target::parse_uri(listen) {
            Ok(uri) => target::fill_uri_params(listen, &uri, &mut params),
            Err(e) => {
                eprintln!("{}", e);
                return DnsUpdaterExitCode::Failure;
            }
        }
    }

    if params.protocol.as_deref().is_some_and(|protocol| protocol != "http") {
        eprintln!("Wrong protocol for --serve, must be http!");
        return DnsUpdaterExitCode::Failure;
    }

    dispatcher
        .config()
        .set_target_protocol("http", cli.protocol.as_deref());

    match dnsupdater_http::serve(dispatcher, params.server.as_deref(), params.port).await {
        Ok(()) => {
            info!("Listener stopped");
            DnsUpdaterExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Listener error: {}", e);
            DnsUpdaterExitCode::RuntimeError
        }
    }
}

#[cfg(not(feature = "http"))]
async fn serve_updates(_cli: &Cli, _dispatcher: Dispatcher) -> DnsUpdaterExitCode {
    eprintln!("--serve needs the http feature");
    DnsUpdaterExitCode::Failure
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
