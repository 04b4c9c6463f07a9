//! Configuration management

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use config::{builder::DefaultState, Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use clap::{Parser, Subcommand};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid module configuration: {0}")]
    InvalidModules(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid security configuration: {0}")]
    InvalidSecurity(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub modules: ModulesConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string()
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: ONYX_MODULES__MODULE_DIR=/srv/modules
        builder = builder.add_source(
            Environment::with_prefix("ONYX")
                .separator("__")
                .try_parsing(true)
        );

        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(module_dir) = &cli_args.module_dir {
            builder = builder.set_override("modules.module_dir", module_dir.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }
        if let Some(role) = &cli_args.role {
            builder = builder.set_override("security.caller_role", role.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults only, used by tests and embedders that configure in code
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.modules.validate()?;
        self.logging.validate()?;
        self.security.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("database.path", "./data/onyx-command.db")?
        .set_default("database.connection_pool_size", 4)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("modules.module_dir", "./modules")?
        .set_default("modules.temp_dir", "./modules/.tmp")?
        .set_default("modules.source_extension", "php")?
        .set_default("modules.lint_command", vec!["php", "-l"])?
        .set_default("modules.archive_on_delete", true)?
        .set_default("modules.archive_dir", "./data/module-archive")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?
        .set_default("logging.persist_audit", true)?
        .set_default("security.caller_role", "administrator")?
        .set_default("security.privileged_roles", vec!["administrator"])?
        .set_default("security.allowed_extensions", vec!["php", "zip"])?
        .set_default("security.max_upload_size", 10485760u64)?) // 10 MB
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "onyx-command")]
#[command(about = "Onyx Command module registry", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Database file path
    #[arg(short, long, value_name = "PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Module root directory
    #[arg(long, value_name = "DIR", global = true)]
    pub module_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Role of the caller performing mutating operations
    #[arg(long, value_name = "ROLE", global = true)]
    pub role: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one load pass over all active modules
    Load,
    /// List module records
    List {
        /// Only show modules with this status (active, inactive)
        #[arg(long)]
        status: Option<String>,
    },
    /// Reconcile the module directory with the record store
    Scan,
    /// Install a module from a source file or zip archive
    Install {
        file: PathBuf,
    },
    /// Mark a module active for the next load pass
    Activate {
        module_id: String,
    },
    /// Mark a module inactive
    Deactivate {
        module_id: String,
    },
    /// Uninstall a module and remove its files and record
    Delete {
        module_id: String,
    },
    /// Explicitly run a module that has not been loaded in this process
    Execute {
        module_id: String,
    },
    /// Replace a module's configuration with a JSON object
    Config {
        module_id: String,
        json: String,
    },
    /// Show recent audit log entries
    Logs {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase("connection_pool_size must be greater than 0".to_string()));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase("busy_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModulesConfig {
    pub module_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Extension of module main files, without the dot
    pub source_extension: String,
    /// Program and leading arguments of the lint command; the file path is appended
    pub lint_command: Vec<String>,
    pub archive_on_delete: bool,
    pub archive_dir: PathBuf,
}

impl ModulesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidModules("module_dir cannot be empty".to_string()));
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidModules("temp_dir cannot be empty".to_string()));
        }

        if self.source_extension.is_empty() || self.source_extension.starts_with('.') {
            return Err(ConfigError::InvalidModules(
                "source_extension must be a bare extension such as \"php\"".to_string()
            ));
        }

        if self.archive_on_delete && self.archive_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidModules(
                "archive_dir must be set when archive_on_delete is true".to_string()
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
    /// Also write audit entries to the database
    pub persist_audit: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub caller_role: String,
    pub privileged_roles: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub max_upload_size: u64, // bytes
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.privileged_roles.is_empty() {
            return Err(ConfigError::InvalidSecurity("privileged_roles cannot be empty".to_string()));
        }

        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::InvalidSecurity("allowed_extensions cannot be empty".to_string()));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::InvalidSecurity("max_upload_size must be greater than 0".to_string()));
        }

        Ok(())
    }
}
