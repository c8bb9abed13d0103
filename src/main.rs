//! shell-relay binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use shell_relay::api::{self, AppState, Authenticator};
use shell_relay::cli;
use shell_relay::config::Config;
use shell_relay::logging;
use shell_relay::session::SessionRegistry;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-relay --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_with(config.log_filter());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config.to_server_config()?;
    let authenticator = config.authenticator();
    if !authenticator.is_enabled() {
        warn!("authentication disabled; every connection runs as identity \"local\"");
    } else if authenticator.is_empty() {
        warn!("authentication enabled but no tokens configured; all connections will be rejected");
    }

    let registry_config = config.registry_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        shell = %registry_config.shell,
        session_timeout_secs = registry_config.session_timeout.as_secs(),
        "starting shell-relay"
    );

    let registry = Arc::new(SessionRegistry::new(registry_config));
    let state = AppState::new(registry, Arc::new(authenticator))
        .with_limits(config.limits())
        .with_probe_timeout(config.probe_timeout())
        .with_keepalive(config.keepalive());

    api::serve(server_config, state).await?;
    Ok(())
}
