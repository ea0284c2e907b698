//! Device -> library: pull annotations from exported papers

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pulldown_cmark::{html, Options, Parser};
use tracing::{debug, info, warn};

use super::extract::{AnnotationExtractor, AnnotationTool, ExtractedAnnotations};
use super::resolver::PathResolver;
use crate::config::Config;
use crate::device::{DeviceClient, DeviceMirror};
use crate::error::{Result, SyncError};
use crate::library::LibraryService;
use crate::types::{annotated_name, AttachmentRef, ItemKey, LibraryRecord, LinkMode, SyncState};

/// Result of one inbound pass
#[derive(Debug, Clone, Default)]
pub struct InboundReport {
    /// Attachments found on the device and compared
    pub checked: usize,
    pub pulled: usize,
    pub up_to_date: usize,
    /// Newer on the device, left alone by a dry run
    pub would_pull: usize,
    /// Exported attachments that are not on the device
    pub missing: usize,
    /// Device copy newer, but the tool found no annotations
    pub without_annotations: usize,
    pub failed: Vec<(ItemKey, String)>,
}

enum AttachmentOutcome {
    Missing,
    UpToDate,
    WouldPull,
    NoAnnotations,
    Pulled,
}

/// Re-checks every exported record for newer annotated copies on the device
pub struct InboundSync<'a> {
    library: &'a dyn LibraryService,
    device: &'a dyn DeviceClient,
    tool: &'a dyn AnnotationTool,
    config: &'a Config,
    dry_run: bool,
}

impl<'a> InboundSync<'a> {
    pub fn new(
        library: &'a dyn LibraryService,
        device: &'a dyn DeviceClient,
        tool: &'a dyn AnnotationTool,
        config: &'a Config,
    ) -> Self {
        Self {
            library,
            device,
            tool,
            config,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check all exported records except those in `exclude`
    pub fn run(&self, exclude: &HashSet<ItemKey>) -> Result<InboundReport> {
        let tags = self.config.tag_config();
        let mut report = InboundReport::default();
        let Some(post_export_tag) = tags.post_export_tag.as_deref() else {
            info!("No zotero.replace_tag configured, nothing to check for annotations");
            return Ok(report);
        };

        let records = self.library.top_items(post_export_tag)?;
        info!("Found {} papers to check for annotations", records.len());

        for record in &records {
            if exclude.contains(&record.key) {
                debug!(key = %record.key, "Sent in this run, not checking");
                continue;
            }
            if tags.state_of(&record.tags) != SyncState::Exported {
                continue;
            }
            if let Err(e) = self.sync_record(record, &mut report) {
                warn!(key = %record.key, title = %record.title, kind = e.kind(), "Pull failed: {}", e);
                report.failed.push((record.key.clone(), e.to_string()));
            }
        }
        Ok(report)
    }

    fn sync_record(&self, record: &LibraryRecord, report: &mut InboundReport) -> Result<()> {
        let resolver = PathResolver::new(self.library, self.config);
        let attachments = resolver.resolve_attachments(record)?;
        let hierarchy = resolver.resolve_hierarchy(record)?;
        let folder = hierarchy.device_path();
        let work = tempfile::Builder::new().prefix("zotrm-pull").tempdir()?;

        for attachment in &attachments {
            match self.sync_attachment(record, attachment, &folder, &resolver, work.path()) {
                Ok(AttachmentOutcome::Missing) => report.missing += 1,
                Ok(AttachmentOutcome::UpToDate) => {
                    report.checked += 1;
                    report.up_to_date += 1;
                }
                Ok(AttachmentOutcome::WouldPull) => {
                    report.checked += 1;
                    report.would_pull += 1;
                }
                Ok(AttachmentOutcome::NoAnnotations) => {
                    report.checked += 1;
                    report.without_annotations += 1;
                }
                Ok(AttachmentOutcome::Pulled) => {
                    report.checked += 1;
                    report.pulled += 1;
                }
                // Library writes abandon the rest of the record
                Err(e @ SyncError::LibraryWrite(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %attachment.path.display(), kind = e.kind(), "Skipping attachment: {}", e);
                    report
                        .failed
                        .push((attachment.item_key.clone(), e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn sync_attachment(
        &self,
        record: &LibraryRecord,
        attachment: &AttachmentRef,
        folder: &str,
        resolver: &PathResolver<'_>,
        work_dir: &Path,
    ) -> Result<AttachmentOutcome> {
        let device_path = format!("{}/{}", folder.trim_end_matches('/'), attachment.file_name());
        let mirror = DeviceMirror::new(self.device);
        if !mirror.file_exists(&device_path)? {
            warn!("{} is not on the remarkable", device_path);
            return Ok(AttachmentOutcome::Missing);
        }

        let stat = self.device.stat(&device_path)?;
        let local = self.comparison_file(attachment, resolver);
        let local_modified = modified_time(&local)?;
        if local_modified >= stat.modified {
            debug!(
                local = %local.display(),
                %local_modified,
                device_modified = %stat.modified,
                "Local copy is up to date"
            );
            return Ok(AttachmentOutcome::UpToDate);
        }

        if self.dry_run {
            info!("Would pull annotations for {}", device_path);
            return Ok(AttachmentOutcome::WouldPull);
        }

        let extracted = AnnotationExtractor::new(self.device, self.tool).extract(
            &device_path,
            Some(&stat),
            work_dir,
        )?;
        if extracted.is_empty() {
            return Ok(AttachmentOutcome::NoAnnotations);
        }

        self.write_back(record, attachment, &extracted, resolver)?;
        info!("Pulled annotations for {}", device_path);
        Ok(AttachmentOutcome::Pulled)
    }

    /// The annotated copy if a previous pass made one, else the original
    fn comparison_file(&self, attachment: &AttachmentRef, resolver: &PathResolver<'_>) -> PathBuf {
        let annotated = match attachment.link_mode {
            LinkMode::Linked => Some(attachment.annotated_sibling()).filter(|p| p.is_file()),
            LinkMode::Managed => resolver
                .find_managed(&annotated_name(&attachment.stem()))
                .into_iter()
                .next(),
        };
        annotated.unwrap_or_else(|| attachment.path.clone())
    }

    fn write_back(
        &self,
        record: &LibraryRecord,
        attachment: &AttachmentRef,
        extracted: &ExtractedAnnotations,
        resolver: &PathResolver<'_>,
    ) -> Result<()> {
        if let Some(note) = &extracted.note {
            let markdown = fs::read_to_string(note)?;
            self.library
                .create_note(&record.key, &markdown_to_html(&markdown))
                .map_err(SyncError::into_library_write)?;
            fs::remove_file(note)?;
            info!(key = %record.key, "Added annotation note to {}", record.title);
        }

        if let Some(pdf) = &extracted.pdf {
            match attachment.link_mode {
                LinkMode::Managed => self.store_managed_copy(record, attachment, pdf)?,
                LinkMode::Linked => self.store_linked_copy(record, attachment, pdf, resolver)?,
            }
            fs::remove_file(pdf)?;
        }
        Ok(())
    }

    /// Replace the annotated child's file, creating the child on first pull
    fn store_managed_copy(
        &self,
        record: &LibraryRecord,
        attachment: &AttachmentRef,
        pdf: &Path,
    ) -> Result<()> {
        let name = annotated_name(&attachment.stem());
        let children = self.library.children(&record.key)?;
        match children
            .iter()
            .find(|c| c.is_attachment() && c.filename.as_deref() == Some(name.as_str()))
        {
            Some(existing) => {
                self.library
                    .replace_attachment_file(existing, pdf)
                    .map_err(SyncError::into_library_write)?;
                info!(key = %existing.key, "Replaced annotated copy {}", name);
            }
            None => {
                let key = self
                    .library
                    .upload_attachment(&record.key, pdf)
                    .map_err(SyncError::into_library_write)?;
                info!(%key, "Attached annotated copy {}", name);
            }
        }
        Ok(())
    }

    /// Write the copy beside the original and link it once
    fn store_linked_copy(
        &self,
        record: &LibraryRecord,
        attachment: &AttachmentRef,
        pdf: &Path,
        resolver: &PathResolver<'_>,
    ) -> Result<()> {
        let target = attachment.annotated_sibling();
        fs::copy(pdf, &target)?;

        let library_path = resolver.linked_library_path(&target).ok_or_else(|| {
            SyncError::LibraryWrite(format!(
                "{} is outside zotero.attachment_dir",
                target.display()
            ))
        })?;
        let children = self.library.children(&record.key)?;
        if children
            .iter()
            .any(|c| c.path.as_deref() == Some(library_path.as_str()))
        {
            debug!(path = %library_path, "Annotated copy already linked");
            return Ok(());
        }

        let title = annotated_name(&attachment.stem());
        let key = self
            .library
            .create_linked_attachment(&record.key, &library_path, &title)
            .map_err(SyncError::into_library_write)?;
        info!(%key, "Linked annotated copy {}", library_path);
        Ok(())
    }
}

fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    Ok(fs::metadata(path)?.modified()?.into())
}

/// Library notes are HTML
fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}
