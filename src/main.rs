//! Onyx Command - module registry command line
//!
//! Runs registry operations against the configured module directory and
//! record store, printing JSON results.

use onyx_command::core::{CliArgs, Command, Config, ErrorResponse, Logger, OnyxError};
use onyx_command::db::{DatabaseManager, ModuleStatus};
use onyx_command::module::{builtin_catalog, ModuleManager, UploadedFile};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = match Config::load(&cli_args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Onyx Command v{}", onyx_command::VERSION);
    info!(path = ?config.database.path, "Database configuration");
    info!(
        module_dir = ?config.modules.module_dir,
        role = %config.security.caller_role,
        "Module configuration"
    );

    let db = Arc::new(
        DatabaseManager::new(
            &config.database.path,
            config.database.connection_pool_size as u32,
            Duration::from_millis(config.database.busy_timeout),
        )
        .context("Failed to initialize database")?,
    );

    let manager = ModuleManager::new(&config, db, builtin_catalog())
        .context("Failed to initialize module system")?;

    let command = cli_args.command.unwrap_or(Command::Load);
    match run(&manager, &config, command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(code = e.error_code(), "Command failed: {}", e);
            let response = ErrorResponse::from_error(&e);
            eprintln!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(1);
        }
    }
}

async fn run(manager: &ModuleManager, config: &Config, command: Command) -> Result<Value, OnyxError> {
    match command {
        Command::Load => {
            let scan = manager.scanner.scan_and_register().await?;
            let pass = manager.loader.load_active_modules().await;
            Ok(json!({ "scan": to_value(&scan)?, "load": to_value(&pass)? }))
        }
        Command::List { status } => {
            let status = status
                .map(|s| s.parse::<ModuleStatus>())
                .transpose()
                .map_err(OnyxError::InvalidModule)?;
            let modules = manager.store.get_modules(status).await?;
            to_value(&modules)
        }
        Command::Scan => to_value(&manager.scanner.scan_and_register().await?),
        Command::Install { file } => install(manager, config, &file).await,
        Command::Activate { module_id } => {
            manager.lifecycle.activate(&module_id).await?;
            Ok(json!({ "module_id": module_id, "status": ModuleStatus::Active }))
        }
        Command::Deactivate { module_id } => {
            manager.lifecycle.deactivate(&module_id).await?;
            Ok(json!({ "module_id": module_id, "status": ModuleStatus::Inactive }))
        }
        Command::Delete { module_id } => {
            manager.lifecycle.delete(&module_id).await?;
            Ok(json!({ "module_id": module_id, "deleted": true }))
        }
        Command::Execute { module_id } => {
            let outcome = manager.loader.execute_module(&module_id).await?;
            Ok(json!({ "module_id": module_id, "result": to_value(&outcome)? }))
        }
        Command::Config { module_id, json } => {
            let settings: Value = serde_json::from_str(&json)
                .map_err(|e| OnyxError::InvalidModule(format!("config is not valid JSON: {}", e)))?;
            let stored = manager.lifecycle.update_config(&module_id, settings).await?;
            Ok(json!({ "module_id": module_id, "config": stored }))
        }
        Command::Logs { limit } => to_value(&manager.audit_log.recent(limit).await?),
    }
}

/// Stage a copy of the file in the temp dir so the installer can consume it
async fn install(manager: &ModuleManager, config: &Config, file: &Path) -> Result<Value, OnyxError> {
    let upload = UploadedFile::from_path(file);
    let staged = config
        .modules
        .temp_dir
        .join(format!("upload-{}", Uuid::new_v4().simple()));
    std::fs::copy(file, &staged)
        .map_err(|e| OnyxError::UploadFailed(format!("{}: {}", file.display(), e)))?;

    let result = manager
        .installer
        .install(&UploadedFile::new(upload.name, &staged))
        .await;

    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }
    to_value(&result?)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, OnyxError> {
    serde_json::to_value(value).map_err(|e| OnyxError::SerializationError(e.to_string()))
}
