mod cli;
mod discovery;
mod error;
mod server;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marquee_config::{AppConfig, DeviceConfigWatcher, load_device_config};
use marquee_core::{CastLauncher, StatusFacade, Supervisor};

use crate::cli::{Cli, Command};
use crate::discovery::DiscoveryListener;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `run` is a service; show lifecycle lines unless asked to be quieter.
    let verbosity = match cli.command {
        Command::Run => cli.global.verbose.saturating_add(1),
        _ => cli.global.verbose,
    };
    init_tracing(verbosity);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "marquee", &mut std::io::stdout());
            Ok(())
        }
        Command::Validate => validate(&cli.global.config_path()),
        Command::Run => run_service(&cli.global.config_path()).await,
    }
}

fn load_app_config(path: &Path) -> Result<AppConfig, CliError> {
    AppConfig::load(path).map_err(|e| CliError::from_config(e, path))
}

// ── validate ─────────────────────────────────────────────────────────

fn validate(path: &Path) -> Result<(), CliError> {
    let app = load_app_config(path)?;
    let devices = load_device_config(&app.device_config_path)
        .map_err(|e| CliError::from_config(e, &app.device_config_path))?;

    #[derive(serde::Serialize)]
    struct Report<'a> {
        config: &'a marquee_config::Config,
        devices: &'a [marquee_core::DeviceInfo],
    }

    let report = Report {
        config: &app.config,
        devices: &devices.devices,
    };
    let text = serde_yaml::to_string(&report).map_err(|e| CliError::Config {
        path: path.display().to_string(),
        source: e.into(),
    })?;
    print!("{text}");
    Ok(())
}

// ── run ──────────────────────────────────────────────────────────────

async fn run_service(path: &Path) -> Result<(), CliError> {
    let app = load_app_config(path)?;
    let supervisor_config = app.supervisor_config();

    let mut watcher = DeviceConfigWatcher::new(&app.device_config_path, app.device_config_poll());
    let initial = watcher
        .load()
        .await
        .map_err(|e| CliError::from_config(e, watcher.path()))?;

    let launcher = CastLauncher::new(&supervisor_config)?;
    let supervisor = Supervisor::start(supervisor_config.backoff, Arc::new(launcher));
    info!(
        devices = initial.devices.len(),
        app_id = %supervisor_config.app_id,
        "starting"
    );
    supervisor.process_configuration(initial)?;

    let cancel = CancellationToken::new();

    let listener = DiscoveryListener::start(app.config.discovery_network_interface.as_deref())?;
    let discovery = tokio::spawn({
        let supervisor = supervisor.clone();
        listener.run(cancel.child_token(), move |event| {
            if let Err(e) = supervisor.process_discovery(event) {
                warn!(error = %e, "discovery event dropped");
            }
        })
    });

    let watcher_task = tokio::spawn({
        let supervisor = supervisor.clone();
        watcher.run(cancel.child_token(), move |config| {
            if let Err(e) = supervisor.process_configuration(config) {
                warn!(error = %e, "device config update dropped");
            }
        })
    });

    let mut server = tokio::spawn(server::serve(
        app.ui_server_addr,
        StatusFacade::new(supervisor.clone()),
        cancel.child_token(),
    ));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "cannot listen for ctrl-c");
            }
            info!("interrupted, shutting down");
            None
        }
        served = &mut server => Some(served),
    };

    cancel.cancel();
    let served = match finished {
        Some(served) => served,
        None => server.await,
    };
    let _ = tokio::join!(discovery, watcher_task);
    supervisor.shutdown().await?;

    let result = served.unwrap_or_else(|e| {
        warn!(error = %e, "status server task failed");
        Ok(())
    });
    info!("stopped");
    result
}
