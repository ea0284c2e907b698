//! Remote annotation device boundary.
//!
//! The tablet is only reachable through its command-line client, which is a
//! single serialized channel: callers must never issue device commands
//! concurrently. Nothing about device state is cached between calls.

mod mirror;
mod rmapi;
mod stat;

pub use mirror::DeviceMirror;
pub use rmapi::Rmapi;
pub use stat::{normalize_timestamp, parse_device_timestamp, DocumentStat};

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Primitive device operations
pub trait DeviceClient {
    /// Whether a folder or document exists at `path` (exit status only)
    fn exists(&self, path: &str) -> Result<bool>;

    /// Create a single folder; its parent must already exist
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Upload a local file into a device folder
    fn put(&self, local: &Path, remote_dir: &str) -> Result<()>;

    /// Download a document archive into `dest_dir`, returning the archive path
    fn get(&self, remote: &str, dest_dir: &Path) -> Result<PathBuf>;

    /// Device metadata for a document
    fn stat(&self, remote: &str) -> Result<DocumentStat>;
}
