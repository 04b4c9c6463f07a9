//! Syntax validation of module source files
//!
//! The check runs an external linter. A missing or misbehaving linter never
//! blocks a module: only a reported parse error does.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::task;
use tracing::debug;

/// Outcome of a syntax check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    Valid,
    /// Linter output describing the error
    SyntaxError(String),
    /// The check could not run; callers proceed
    Unavailable(String),
}

impl SyntaxCheck {
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, SyntaxCheck::SyntaxError(_))
    }
}

pub trait SyntaxValidator: Send + Sync {
    /// Blocking check of a single file
    fn check(&self, file: &Path) -> SyntaxCheck;
}

/// Run a validator on the blocking pool
pub async fn check_blocking(validator: Arc<dyn SyntaxValidator>, file: PathBuf) -> SyntaxCheck {
    match task::spawn_blocking(move || validator.check(&file)).await {
        Ok(check) => check,
        Err(e) => SyntaxCheck::Unavailable(format!("syntax check task failed: {}", e)),
    }
}

/// Validator that shells out to a lint command such as `php -l`
#[derive(Debug, Clone)]
pub struct CommandSyntaxValidator {
    program: String,
    args: Vec<String>,
}

impl CommandSyntaxValidator {
    /// `command` is the program followed by its arguments; the file path is appended
    pub fn new(command: &[String]) -> Self {
        let (program, args) = match command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self { program, args }
    }
}

impl SyntaxValidator for CommandSyntaxValidator {
    fn check(&self, file: &Path) -> SyntaxCheck {
        if self.program.is_empty() {
            return SyntaxCheck::Unavailable("no lint command configured".to_string());
        }

        debug!("Executing: {} {:?} {}", self.program, self.args, file.display());

        let output = match Command::new(&self.program).args(&self.args).arg(file).output() {
            Ok(output) => output,
            Err(e) => {
                return SyntaxCheck::Unavailable(format!(
                    "failed to execute {}: {}",
                    self.program, e
                ))
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        classify(output.status.success(), &text)
    }
}

/// Interpret linter exit status and output
pub fn classify(success: bool, output: &str) -> SyntaxCheck {
    if success {
        return SyntaxCheck::Valid;
    }

    let lowered = output.to_lowercase();
    if lowered.contains("parse error") || lowered.contains("syntax error") {
        SyntaxCheck::SyntaxError(output.trim().to_string())
    } else {
        SyntaxCheck::Unavailable(format!("linter failed: {}", output.trim()))
    }
}
