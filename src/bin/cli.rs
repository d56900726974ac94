//! Firmhub CLI - Main entry point
//!
//! This binary provides the `firmhub` tool: the update server and a few
//! commands to inspect and synchronize the local release store.

use anyhow::{bail, Context, Result};
use clap::Parser;
use firmhub_lib::engine::{
    alert::Alerter,
    api::{create_router, releases_report, resolve_update, ApiState},
    cli::{
        formatter::{format_duration, format_size, CliFormatter},
        Cli, Commands, OutputFormat,
    },
    config::Config,
    device::{DeviceClass, DeviceUpdateRequest, ImageKind},
    github::GitHubClient,
    release::{ReleaseStore, ReleaseSynchronizer, SyncStatus, SyncStatusBoard, Version},
    scheduler::Scheduler,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over the verbosity flags. Logs go to stderr so JSON
/// output on stdout stays parseable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run_cli(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { owner, repo, force } => {
            cmd_init(&config_path, &owner, &repo, force, json_output)
        }
        Commands::Serve { host, port, no_sync } => {
            let config = load_config(&config_path)?;
            cmd_serve(config, host, port, no_sync).await
        }
        Commands::Sync => cmd_sync(load_config(&config_path)?, json_output).await,
        Commands::Status => cmd_status(load_config(&config_path)?, json_output).await,
        Commands::Verify { version } => {
            cmd_verify(load_config(&config_path)?, &version, json_output).await
        }
        Commands::Check { current_version, mode } => {
            cmd_check(load_config(&config_path)?, &current_version, &mode, json_output).await
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn synchronizer(
    config: &Config,
    store: Arc<ReleaseStore>,
) -> Result<ReleaseSynchronizer<GitHubClient>> {
    let client = GitHubClient::new(config.request_timeout())?
        .with_api_url(&config.release.api_url)
        .with_token(config.token());
    Ok(ReleaseSynchronizer::new(store, client))
}

fn scheduler(
    config: &Config,
    store: Arc<ReleaseStore>,
    status: Arc<SyncStatusBoard>,
) -> Result<Scheduler<GitHubClient>> {
    let webhook_url = config.alerts.webhook_url.as_deref();
    let alerter = Alerter::from_webhook(webhook_url, config.request_timeout())
        .context("Failed to set up the alert webhook")?;
    let synchronizer = Arc::new(synchronizer(config, store)?);
    Ok(Scheduler::new(synchronizer, status, alerter, config.interval()))
}

fn cmd_init(config_path: &Path, owner: &str, repo: &str, force: bool, json: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", config_path.display());
    }

    let config = Config::default_for_source(owner, repo);
    config.validate()?;
    config.save(config_path)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "config": config_path.display().to_string(),
            })
        );
    } else {
        CliFormatter::success(&format!("Created {}", config_path.display()));
        CliFormatter::kv("Source", &config.source().full_name());
        CliFormatter::kv("Update folder", &config.store.update_folder.display().to_string());
        CliFormatter::info("Run `firmhub sync` to fetch the latest release, then `firmhub serve`");
    }
    Ok(())
}

async fn cmd_serve(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    no_sync: bool,
) -> Result<()> {
    let store = Arc::new(config.release_store());
    store
        .init()
        .with_context(|| format!("Failed to create {}", store.source_dir().display()))?;
    let sync_status = Arc::new(SyncStatusBoard::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = if no_sync {
        warn!("Background synchronization is disabled");
        None
    } else {
        Some(scheduler(&config, store.clone(), sync_status.clone())?.spawn(shutdown_rx))
    };

    let state = ApiState {
        store: store.clone(),
        artifacts: Arc::new(config.artifacts()),
        sync_status,
    };
    let app = create_router(state);

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );
    CliFormatter::header("Firmhub update server");
    CliFormatter::kv("Source", &store.source().full_name());
    CliFormatter::kv("Releases", &store.source_dir().display().to_string());
    if !no_sync {
        CliFormatter::kv("Sync interval", &format_duration(config.release.interval_secs));
    }
    CliFormatter::kv("Listening", &format!("http://{}", addr));
    CliFormatter::info("Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        // A download in progress is abandoned; its directory fails verification next time
        let abort = handle.abort_handle();
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            warn!("Synchronization did not stop in time, aborting it");
            abort.abort();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn cmd_sync(config: Config, json: bool) -> Result<()> {
    let store = Arc::new(config.release_store());
    store.init()?;
    let board = Arc::new(SyncStatusBoard::new());
    let status = scheduler(&config, store, board.clone())?.run_once().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&board.snapshot())?);
    } else {
        CliFormatter::sync_status(&status);
    }

    if let SyncStatus::Failed { reason } = status {
        bail!(reason);
    }
    Ok(())
}

async fn cmd_status(config: Config, json: bool) -> Result<()> {
    let store = config.release_store();
    let report = releases_report(&store).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        CliFormatter::releases(&report);
    }
    Ok(())
}

async fn cmd_verify(config: Config, version: &str, json: bool) -> Result<()> {
    let version = Version::parse(version)?;
    let store = config.release_store();
    let guard = store.lock().await?;

    let path = guard.path(&version);
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }
    let result = guard.verify(&version, store.required_files());
    drop(guard);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "version": version.to_string(),
                "verified": result.is_verified(),
                "result": result.to_string(),
            })
        );
    } else {
        CliFormatter::verification(version.as_str(), &result);
    }

    if !result.is_verified() {
        bail!("{} failed verification", version);
    }
    Ok(())
}

async fn cmd_check(config: Config, current_version: &str, mode: &str, json: bool) -> Result<()> {
    let store = config.release_store();
    let artifacts = config.artifacts();
    let request = DeviceUpdateRequest {
        class: DeviceClass::Esp8266,
        current_version: Version::parse(current_version)?,
        kind: ImageKind::from_mode(mode),
    };

    let artifact = resolve_update(&store, &artifacts, &request).await?;

    match (json, artifact) {
        (true, Some(artifact)) => println!(
            "{}",
            serde_json::json!({
                "update": true,
                "version": artifact.version.to_string(),
                "file": artifact.path.display().to_string(),
                "attachment": artifact.attachment_name,
                "digest_header": artifact.digest_header,
                "digest": artifact.digest,
                "size": artifact.size,
            })
        ),
        (true, None) => println!("{}", serde_json::json!({ "update": false })),
        (false, Some(artifact)) => {
            CliFormatter::success(&format!(
                "Device at {} would receive {}",
                request.current_version, artifact.version
            ));
            CliFormatter::kv("File", &artifact.path.display().to_string());
            CliFormatter::kv("Attachment", &artifact.attachment_name);
            CliFormatter::kv(artifact.digest_header, &artifact.digest);
            CliFormatter::kv("Size", &format_size(artifact.size));
        }
        (false, None) => CliFormatter::info(&format!(
            "Device at {} would get 304 Not Modified",
            request.current_version
        )),
    }
    Ok(())
}
