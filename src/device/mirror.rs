//! Idempotent folder mirroring on the device

use tracing::{debug, info};

use super::DeviceClient;
use crate::error::Result;
use crate::types::CollectionHierarchy;

/// Builds device folders and checks for documents, one query at a time
pub struct DeviceMirror<'a> {
    device: &'a dyn DeviceClient,
    dry_run: bool,
}

impl<'a> DeviceMirror<'a> {
    pub fn new(device: &'a dyn DeviceClient) -> Self {
        Self {
            device,
            dry_run: false,
        }
    }

    /// Report missing folders instead of creating them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Make sure every folder of `hierarchy` exists, returning the device path
    /// and whether it is now present on the device.
    ///
    /// A prefix is only queried while all of its ancestors were found. Once one
    /// is missing, every deeper prefix is created without being queried. In a
    /// dry run nothing is created, so a missing folder is reported as absent.
    pub fn ensure_path(&self, hierarchy: &CollectionHierarchy) -> Result<(String, bool)> {
        let mut path = String::new();
        let mut parent_exists = true;

        for folder in hierarchy.folders().iter().filter(|f| !f.is_empty()) {
            path.push('/');
            path.push_str(folder);

            if parent_exists {
                parent_exists = self.device.exists(&path)?;
            }
            if parent_exists {
                continue;
            }

            if self.dry_run {
                info!(path = %path, "Would create directory on remarkable");
                continue;
            }
            self.device.mkdir(&path)?;
            info!(path = %path, "Created directory on remarkable");
        }

        if path.is_empty() {
            path.push('/');
        }
        if parent_exists {
            debug!(path = %path, "Directory already on remarkable");
        }
        let present = parent_exists || !self.dry_run;
        Ok((path, present))
    }

    /// Whether a document exists; the device addresses documents without extension
    pub fn file_exists(&self, device_path: &str) -> Result<bool> {
        self.device.exists(strip_extension(device_path))
    }
}

/// Drop the extension of the last path component, if any
fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = &path[name_start..];
    match name.rfind('.') {
        // A leading dot is part of the name, not an extension
        Some(dot) if dot > 0 && name[..dot].chars().any(|c| c != '.') => {
            &path[..name_start + dot]
        }
        _ => path,
    }
}
