//! Library -> device: upload papers tagged for export

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use super::resolver::PathResolver;
use super::transform::PageTransform;
use crate::config::Config;
use crate::device::{DeviceClient, DeviceMirror};
use crate::error::{Result, SyncError};
use crate::library::LibraryService;
use crate::types::{AttachmentRef, ItemKey, LibraryRecord, SyncState, TagConfig};

/// Result of one outbound pass
#[derive(Debug, Clone, Default)]
pub struct OutboundReport {
    /// Records now on the device; excluded from the following inbound pass
    pub sent: HashSet<ItemKey>,
    pub uploaded: usize,
    pub already_present: usize,
    /// Records without any PDF attachment
    pub skipped: usize,
    pub failed: Vec<(ItemKey, String)>,
}

enum RecordOutcome {
    Skipped,
    /// `error` is set when an upload failed after earlier attachments made it
    Sent {
        uploaded: usize,
        present: usize,
        error: Option<SyncError>,
    },
}

enum AttachmentOutcome {
    Present,
    Uploaded,
}

/// Uploads every record carrying the export tag
pub struct OutboundSync<'a> {
    library: &'a dyn LibraryService,
    device: &'a dyn DeviceClient,
    config: &'a Config,
    transform: Option<&'a dyn PageTransform>,
    dry_run: bool,
}

impl<'a> OutboundSync<'a> {
    pub fn new(
        library: &'a dyn LibraryService,
        device: &'a dyn DeviceClient,
        config: &'a Config,
    ) -> Self {
        Self {
            library,
            device,
            config,
            transform: None,
            dry_run: false,
        }
    }

    /// Rewrite each PDF before upload
    pub fn with_transform(mut self, transform: Option<&'a dyn PageTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process every export-tagged record; a failing record never stops the pass
    pub fn run(&self) -> Result<OutboundReport> {
        let tags = self.config.tag_config();
        let records = self.library.top_items(&tags.export_tag)?;
        info!("Found {} papers to send", records.len());

        let mut report = OutboundReport::default();
        for record in &records {
            match self.sync_record(record, &tags) {
                Ok(RecordOutcome::Skipped) => report.skipped += 1,
                Ok(RecordOutcome::Sent {
                    uploaded,
                    present,
                    error,
                }) => {
                    report.uploaded += uploaded;
                    report.already_present += present;
                    report.sent.insert(record.key.clone());
                    if let Some(e) = error {
                        warn!(key = %record.key, title = %record.title, kind = e.kind(), "Send incomplete: {}", e);
                        report.failed.push((record.key.clone(), e.to_string()));
                    }
                }
                Err(e) => {
                    warn!(key = %record.key, title = %record.title, kind = e.kind(), "Send failed: {}", e);
                    report.failed.push((record.key.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn sync_record(&self, record: &LibraryRecord, tags: &TagConfig) -> Result<RecordOutcome> {
        let resolver = PathResolver::new(self.library, self.config);
        let attachments = resolver.resolve_attachments(record)?;
        if attachments.is_empty() {
            info!(key = %record.key, "No PDF attachments for {}, skipping", record.title);
            return Ok(RecordOutcome::Skipped);
        }

        let hierarchy = resolver.resolve_hierarchy(record)?;
        let mirror = DeviceMirror::new(self.device).with_dry_run(self.dry_run);
        let (folder, folder_present) = mirror.ensure_path(&hierarchy)?;

        let scratch = match self.transform {
            Some(_) => Some(tempfile::Builder::new().prefix("zotrm-transform").tempdir()?),
            None => None,
        };
        let scratch_dir = scratch.as_ref().map(|dir| dir.path());

        let mut uploaded = 0;
        let mut present = 0;
        let mut error = None;
        for attachment in &attachments {
            match self.send_attachment(&mirror, attachment, &folder, folder_present, scratch_dir) {
                Ok(AttachmentOutcome::Present) => present += 1,
                Ok(AttachmentOutcome::Uploaded) => uploaded += 1,
                // Nothing reached the device: the record keeps its export tag
                Err(e) if uploaded + present == 0 => return Err(e),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let new_tags = tags.encode(&record.tags, SyncState::Exported);
        if self.dry_run {
            info!(key = %record.key, ?new_tags, "Would update tags for {}", record.title);
        } else {
            self.library.update_tags(record, &new_tags)?;
            info!(key = %record.key, "Updated tags for {}", record.title);
        }

        Ok(RecordOutcome::Sent {
            uploaded,
            present,
            error,
        })
    }

    fn send_attachment(
        &self,
        mirror: &DeviceMirror<'_>,
        attachment: &AttachmentRef,
        folder: &str,
        folder_present: bool,
        scratch_dir: Option<&Path>,
    ) -> Result<AttachmentOutcome> {
        let name = attachment.file_name();
        debug!(path = %attachment.path.display(), "Found PDF file");

        let target = format!("{}/{}", folder.trim_end_matches('/'), name);
        if folder_present && mirror.file_exists(&target)? {
            info!("File {} already exists, skipping", name);
            return Ok(AttachmentOutcome::Present);
        }

        if self.dry_run {
            info!("Would upload {} to {}", name, folder);
            return Ok(AttachmentOutcome::Uploaded);
        }

        let source = match (self.transform, scratch_dir) {
            (Some(transform), Some(dir)) => transform.apply(&attachment.path, dir)?,
            _ => attachment.path.clone(),
        };
        self.device.put(&source, folder)?;
        info!("Uploaded {} to {}", name, folder);
        Ok(AttachmentOutcome::Uploaded)
    }
}
