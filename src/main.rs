// ABOUTME: Entry point for the switchyard CLI application.
// ABOUTME: Parses arguments, dispatches commands and maps outcomes to exit codes.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchyard::config::{self, Config};
use switchyard::deploy::{
    BackupManager, DeployErrorKind, DeployReport, DeployRequest, DeployStatus, DeploymentController,
    DeploymentHistory, EXIT_DEPLOY_IN_PROGRESS, EXIT_ERROR, EXIT_PROMOTED, SlotAllocator,
    cancel_pair,
};
use switchyard::error::{Error, Result};
use switchyard::notify::{Notifier, NullNotifier, WebhookNotifier};
use switchyard::output::{Output, OutputMode};
use switchyard::probe::HttpProbe;
use switchyard::proxy::CommandProxy;
use switchyard::runtime::connect_local;
use switchyard::types::EnvironmentName;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut output = Output::new(OutputMode::from_flags(cli.quiet, cli.json));

    let code = match run(cli, &mut output).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, output: &mut Output) -> Result<i32> {
    match cli.command {
        Commands::Init {
            service,
            image,
            force,
        } => {
            let cwd = env::current_dir()?;
            config::init_config(&cwd, service.as_deref(), image.as_deref(), force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(EXIT_PROMOTED)
        }
        Commands::Deploy {
            environment,
            skip_tests,
            timeout,
            allow_missing_backup,
            force,
        } => {
            let (environment, config) = load_environment(cli.config.as_deref(), &environment)?;
            let request = DeployRequest {
                skip_tests,
                timeout: timeout.map(Duration::from_secs),
                allow_missing_backup,
                force,
            };
            deploy(&config, &environment, &request, output).await
        }
        Commands::Status { environment } => {
            let (environment, config) = load_environment(cli.config.as_deref(), &environment)?;
            status(&config, &environment, output)?;
            Ok(EXIT_PROMOTED)
        }
        Commands::History { environment, limit } => {
            let (environment, config) = load_environment(cli.config.as_deref(), &environment)?;
            history(&config, &environment, limit, output)?;
            Ok(EXIT_PROMOTED)
        }
        Commands::Backups { environment } => {
            let (_, config) = load_environment(cli.config.as_deref(), &environment)?;
            backups(&config, output)?;
            Ok(EXIT_PROMOTED)
        }
    }
}

/// Load the config, apply the environment's overrides and `SWITCHYARD_*` variables.
fn load_environment(path: Option<&Path>, environment: &str) -> Result<(EnvironmentName, Config)> {
    let environment =
        EnvironmentName::new(environment).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let base = match path {
        Some(p) => Config::load(p)?,
        None => Config::discover(&env::current_dir()?)?,
    };
    let mut config = base.for_environment(&environment)?;
    config.apply_env_overrides()?;
    Ok((environment, config))
}

async fn deploy(
    config: &Config,
    environment: &EnvironmentName,
    request: &DeployRequest,
    output: &mut Output,
) -> Result<i32> {
    let runtime = connect_local(&config.runtime).await?;
    let probe = HttpProbe::new();
    let proxy = CommandProxy::new(
        config.proxy.validate_command.clone(),
        config.proxy.reload_command.clone(),
    );
    let notifier: Box<dyn Notifier> = match &config.notify {
        Some(notify) => match WebhookNotifier::from_config(notify) {
            Ok(webhook) => Box::new(webhook),
            Err(e) => {
                output.warning(&format!("notifications disabled: {}", e));
                Box::new(NullNotifier)
            }
        },
        None => Box::new(NullNotifier),
    };

    let controller = DeploymentController::new(
        config,
        environment,
        &runtime,
        &probe,
        &proxy,
        notifier.as_ref(),
    )?;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling deployment");
            handle.cancel();
        }
    });

    output.start_timer();
    output.progress(&format!(
        "Deploying {} to {}",
        config.service, environment
    ));

    match controller.run(request, signal).await {
        Ok(report) => {
            print_report(&report, output);
            Ok(report.exit_code())
        }
        Err(e) if e.kind() == DeployErrorKind::DeployInProgress => {
            output.error(&e.to_string());
            Ok(EXIT_DEPLOY_IN_PROGRESS)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &DeployReport, output: &Output) {
    for warning in &report.warnings {
        output.warning(&warning.message);
    }
    output.data("deployment", &report.record);

    let record = &report.record;
    let version = record
        .version_tag
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    match (record.status, &report.error) {
        (DeployStatus::Promoted, _) => {
            let slot = record.slot.map(|s| s.to_string()).unwrap_or_default();
            output.success(&format!("PROMOTED {} to {}", version, slot));
        }
        (status, Some(error)) => output.error(&format!("{}: {}", status, error)),
        (status, None) => output.error(&status.to_string()),
    }
    output.progress(&format!("History: {}", report.history_path.display()));
}

fn status(config: &Config, environment: &EnvironmentName, output: &Output) -> Result<()> {
    let state_dir = config.state_dir_for(environment);
    let state = SlotAllocator::new(&state_dir).state()?;
    let last = DeploymentHistory::new(&state_dir).recent(1)?.into_iter().next();

    if output.mode() == OutputMode::Json {
        output.data(
            "status",
            &serde_json::json!({
                "service": config.service,
                "environment": environment,
                "slot_state": state,
                "last_deployment": last,
            }),
        );
        return Ok(());
    }

    println!("Service:     {}", config.service);
    println!("Environment: {}", environment);
    match state.live() {
        Some((slot, version)) => {
            println!("Live slot:   {} ({})", slot, config.slots.address(slot));
            println!("Version:     {}", version);
            if let Some(at) = state.promoted_at {
                println!("Promoted at: {}", at.to_rfc3339());
            }
        }
        None => println!("Live slot:   none (never promoted)"),
    }
    if let Some(record) = last {
        println!(
            "Last deploy: {} {} {}",
            record.id,
            record.status,
            record
                .error
                .as_deref()
                .map(|e| format!("({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn history(
    config: &Config,
    environment: &EnvironmentName,
    limit: usize,
    output: &Output,
) -> Result<()> {
    let history = DeploymentHistory::new(&config.state_dir_for(environment));
    let records = history.recent(limit)?;

    if output.mode() == OutputMode::Json {
        output.data("history", &records);
        return Ok(());
    }
    if records.is_empty() {
        println!("No deployments recorded in {}", history.path().display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<15} {:<28} {:<6} {} probes{}",
            record.id,
            record.status.as_str(),
            record
                .version_tag
                .as_ref()
                .map(|v| v.as_str())
                .unwrap_or("-"),
            record.slot.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            record.health_check_attempts.len(),
            record
                .error
                .as_deref()
                .map(|e| format!("  {}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn backups(config: &Config, output: &Output) -> Result<()> {
    let entries = BackupManager::new(&config.backup.dir).list()?;

    if output.mode() == OutputMode::Json {
        output.data("backups", &entries);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No backups in {}", config.backup.dir.display());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  {} path(s)  {}",
            entry.id,
            entry.created_at.to_rfc3339(),
            entry.source_paths.len(),
            display_path(&entry.archive_location)
        );
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    let cwd: PathBuf = env::current_dir().unwrap_or_default();
    path.strip_prefix(&cwd)
        .unwrap_or(path)
        .display()
        .to_string()
}
