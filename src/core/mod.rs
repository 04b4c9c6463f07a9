//! Core application layer
//!
//! This module provides the ambient services shared by the module system:
//! - Configuration management
//! - Structured logging
//! - Error handling and the error taxonomy

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CliArgs, Command, Config};
pub use error::{ConflictReport, ErrorResponse, OnyxError, Result};
pub use logging::Logger;
