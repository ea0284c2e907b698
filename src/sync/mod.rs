//! Library <-> device synchronization
//!
//! A run is two sequential passes:
//!
//! 1. **Outbound**: records tagged for export are uploaded into device folders
//!    mirroring their collection hierarchy, then re-tagged as exported.
//! 2. **Inbound**: exported records are compared against the device; when the
//!    device copy is strictly newer, its annotations are extracted and written
//!    back to the library as a note and an annotated PDF.
//!
//! Records uploaded by the outbound pass are skipped by the inbound pass of
//! the same run. Every record and attachment is processed to completion
//! before the next one; device commands are never issued concurrently.

mod extract;
mod inbound;
mod outbound;
mod resolver;
mod transform;

pub use extract::{
    AnnotationExtractor, AnnotationTool, ExtractedAnnotations, Remarks, NO_ANNOTATIONS_MARKER,
};
pub use inbound::{InboundReport, InboundSync};
pub use outbound::{OutboundReport, OutboundSync};
pub use resolver::PathResolver;
pub use transform::{CommandTransform, PageTransform};

use std::collections::HashSet;
use std::fmt;

use tracing::{error, warn};

use crate::config::Config;
use crate::device::DeviceClient;
use crate::error::Result;
use crate::library::LibraryService;
use crate::types::ItemKey;

/// Which passes a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    #[default]
    Both,
    OutboundOnly,
    InboundOnly,
}

impl SyncDirection {
    pub fn outbound(self) -> bool {
        matches!(self, SyncDirection::Both | SyncDirection::OutboundOnly)
    }

    pub fn inbound(self) -> bool {
        matches!(self, SyncDirection::Both | SyncDirection::InboundOnly)
    }
}

/// Per-run options from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    /// Discover and log, but change nothing on the device or in the library
    pub dry_run: bool,
}

/// Summary of a run
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub outbound: Option<OutboundReport>,
    pub inbound: Option<InboundReport>,
    /// Passes that could not start, e.g. because listing records failed
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
            || self.outbound.as_ref().is_some_and(|r| !r.failed.is_empty())
            || self.inbound.as_ref().is_some_and(|r| !r.failed.is_empty())
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(out) = &self.outbound {
            parts.push(format!(
                "sent {} papers ({} uploaded, {} already present, {} without PDF, {} failed)",
                out.sent.len(),
                out.uploaded,
                out.already_present,
                out.skipped,
                out.failed.len()
            ));
        }
        if let Some(inb) = &self.inbound {
            parts.push(format!(
                "checked {} attachments ({} pulled, {} up to date, {} not on device, {} failed)",
                inb.checked,
                inb.pulled,
                inb.up_to_date,
                inb.missing,
                inb.failed.len()
            ));
        }
        if !self.errors.is_empty() {
            parts.push(format!("{} passes aborted", self.errors.len()));
        }
        if parts.is_empty() {
            write!(f, "nothing to do")
        } else {
            write!(f, "{}", parts.join("; "))
        }
    }
}

/// Runs outbound then inbound sync against one library and one device
pub struct SyncEngine<'a> {
    config: &'a Config,
    library: &'a dyn LibraryService,
    device: &'a dyn DeviceClient,
    tool: Option<&'a dyn AnnotationTool>,
    transform: Option<&'a dyn PageTransform>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        config: &'a Config,
        library: &'a dyn LibraryService,
        device: &'a dyn DeviceClient,
    ) -> Self {
        Self {
            config,
            library,
            device,
            tool: None,
            transform: None,
        }
    }

    /// Annotation tool; without one the inbound pass is skipped
    pub fn with_tool(mut self, tool: Option<&'a dyn AnnotationTool>) -> Self {
        self.tool = tool;
        self
    }

    /// Transform applied to every PDF before upload
    pub fn with_transform(mut self, transform: Option<&'a dyn PageTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Run the requested passes. Only configuration errors are returned;
    /// everything else is logged and recorded in the report.
    pub fn run(&self, options: SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut just_sent: HashSet<ItemKey> = HashSet::new();

        if options.direction.outbound() {
            let outbound = OutboundSync::new(self.library, self.device, self.config)
                .with_transform(self.transform)
                .with_dry_run(options.dry_run);
            match outbound.run() {
                Ok(out) => {
                    just_sent = out.sent.clone();
                    report.outbound = Some(out);
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    error!(kind = e.kind(), "Outbound sync aborted: {}", e);
                    report.errors.push(format!("outbound: {}", e));
                }
            }
        }

        if options.direction.inbound() {
            match self.tool {
                None => warn!("No [remarks] tool configured, skipping annotation pull"),
                Some(tool) => {
                    let inbound = InboundSync::new(self.library, self.device, tool, self.config)
                        .with_dry_run(options.dry_run);
                    match inbound.run(&just_sent) {
                        Ok(inb) => report.inbound = Some(inb),
                        Err(e) if e.is_run_fatal() => return Err(e),
                        Err(e) => {
                            error!(kind = e.kind(), "Inbound sync aborted: {}", e);
                            report.errors.push(format!("inbound: {}", e));
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}
