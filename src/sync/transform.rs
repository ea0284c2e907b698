//! Page-orientation transform applied before upload

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::TransformConfig;
use crate::error::{Result, SyncError};

/// Rewrites a PDF into `out_dir`, keeping its file name
pub trait PageTransform {
    fn apply(&self, input: &Path, out_dir: &Path) -> Result<PathBuf>;
}

/// Runs an external command such as `qpdf --rotate=+90 {input} {output}`
pub struct CommandTransform {
    config: TransformConfig,
}

impl CommandTransform {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl PageTransform for CommandTransform {
    fn apply(&self, input: &Path, out_dir: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .ok_or_else(|| SyncError::Transform(format!("no file name: {}", input.display())))?;
        let output = out_dir.join(name);

        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect();
        debug!(command = %self.config.command, ?args, "Running page transform");

        let result = Command::new(&self.config.command)
            .args(&args)
            .output()
            .map_err(|e| {
                SyncError::Transform(format!("failed to run {}: {}", self.config.command, e))
            })?;
        if !result.status.success() {
            return Err(SyncError::Transform(format!(
                "{} exited with {}: {}",
                self.config.command,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        if !output.is_file() {
            return Err(SyncError::Transform(format!(
                "{} produced no output",
                self.config.command
            )));
        }
        Ok(output)
    }
}
