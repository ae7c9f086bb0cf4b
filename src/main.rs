//! assetflow - asset pipeline engine CLI.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};

use assetflow::config::{CONFIG_FILE, EngineConfig, find_config_file};
use assetflow::{Engine, log, logger};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    cli::setup_shutdown_handler()?;

    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config_path = resolve_config_path(&cli)?;
    let config = EngineConfig::load(Some(&config_path))
        .with_context(|| format!("loading {}", config_path.display()))?;
    let engine = Engine::from_config(&config).context("assembling workflows")?;

    match cli.command {
        Commands::Build { out, workflow } => {
            let out = out.unwrap_or_else(|| config.output.dir.clone());
            let report = cli::build::build_all(&engine, &out, workflow.as_deref(), false)?;
            log!(
                "build"; "{} file(s) from {} workflow(s) in {}",
                report.files,
                report.workflows,
                out.display()
            );
            Ok(())
        }
        Commands::Watch { out } => {
            let out = out.unwrap_or_else(|| config.output.dir.clone());
            cli::watch::watch(&engine, config, Some(config_path), &out)
        }
        Commands::Serve {
            interface,
            port,
            watch,
        } => {
            let interface = interface.unwrap_or(config.serve.interface);
            let port = port.unwrap_or(config.serve.port);
            let engine = Arc::new(engine);
            if watch {
                spawn_watcher(Arc::clone(&engine), config, config_path);
            }
            cli::serve::serve(engine, interface, port)
        }
    }
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => find_config_file(std::path::Path::new(CONFIG_FILE))
            .with_context(|| format!("{CONFIG_FILE} not found in this or any parent directory")),
    }
}

/// Keep sources fresh while serving; results go to the configured output.
fn spawn_watcher(engine: Arc<Engine>, config: EngineConfig, config_path: PathBuf) {
    std::thread::spawn(move || {
        let out = config.output.dir.clone();
        if let Err(e) = cli::watch::watch(&engine, config, Some(config_path), &out) {
            log!("watch"; "stopped: {e:#}");
        }
    });
}
