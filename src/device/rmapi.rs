//! `rmapi` subprocess wrapper

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use super::{DeviceClient, DocumentStat};
use crate::error::{Result, SyncError};
use crate::types::strip_pdf_extension;

/// Device client backed by the `rmapi` command-line tool
pub struct Rmapi {
    binary: PathBuf,
}

impl Rmapi {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, cmd: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg(cmd);
        command
    }

    /// Run with output discarded, returning only whether it succeeded
    fn status(&self, mut command: Command) -> Result<bool> {
        let status = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;
        Ok(status.success())
    }

    fn output(&self, mut command: Command) -> Result<Output> {
        command.output().map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: std::io::Error) -> SyncError {
        SyncError::Device(format!("failed to run {}: {}", self.binary.display(), e))
    }
}

impl DeviceClient for Rmapi {
    fn exists(&self, path: &str) -> Result<bool> {
        debug!(path, "rmapi find");
        let mut command = self.command("find");
        command.arg(path);
        self.status(command)
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        debug!(path, "rmapi mkdir");
        let mut command = self.command("mkdir");
        command.arg(path);
        if self.status(command)? {
            Ok(())
        } else {
            Err(SyncError::DeviceCreate(path.to_string()))
        }
    }

    fn put(&self, local: &Path, remote_dir: &str) -> Result<()> {
        debug!(local = %local.display(), remote_dir, "rmapi put");
        let mut command = self.command("put");
        command.arg(local).arg(remote_dir);
        if self.status(command)? {
            Ok(())
        } else {
            Err(SyncError::Upload(local.display().to_string()))
        }
    }

    fn get(&self, remote: &str, dest_dir: &Path) -> Result<PathBuf> {
        let remote = strip_pdf_extension(remote);
        debug!(remote, dest = %dest_dir.display(), "rmapi get");
        let mut command = self.command("get");
        command.arg(remote).current_dir(dest_dir);
        let output = self.output(command)?;
        if !output.status.success() {
            return Err(SyncError::Device(format!(
                "get {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let name = remote.rsplit('/').next().unwrap_or(remote);
        Ok(dest_dir.join(format!("{}.zip", name)))
    }

    fn stat(&self, remote: &str) -> Result<DocumentStat> {
        let remote = strip_pdf_extension(remote);
        debug!(remote, "rmapi stat");
        let mut command = self.command("stat");
        command.arg(remote);
        let output = self.output(command)?;
        if !output.status.success() {
            return Err(SyncError::Device(format!(
                "stat {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        DocumentStat::parse(&String::from_utf8_lossy(&output.stdout))
    }
}
