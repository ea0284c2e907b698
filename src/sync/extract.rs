//! Annotation extraction from device document archives

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::json;
use tracing::{debug, info};

use crate::config::RemarksConfig;
use crate::device::{DeviceClient, DocumentStat};
use crate::error::{Result, SyncError};
use crate::types::{annotated_name, strip_pdf_extension};

/// Console text the extraction tool prints when a document has no annotations
pub const NO_ANNOTATIONS_MARKER: &str = "no annotations found";

/// External tool turning an unpacked document into markdown + PDF
pub trait AnnotationTool {
    /// Write combined outputs into `out_dir`, returning the tool's console output
    fn run(&self, input_dir: &Path, out_dir: &Path) -> Result<String>;
}

/// The `remarks` extraction tool
pub struct Remarks {
    config: RemarksConfig,
}

impl Remarks {
    pub fn new(config: RemarksConfig) -> Self {
        Self { config }
    }
}

impl AnnotationTool for Remarks {
    fn run(&self, input_dir: &Path, out_dir: &Path) -> Result<String> {
        // A source checkout runs as a module from its own directory
        let mut command = if self.config.path.is_dir() {
            let mut command = Command::new(&self.config.python);
            command
                .arg("-m")
                .arg("remarks")
                .current_dir(&self.config.path);
            command
        } else {
            Command::new(&self.config.path)
        };
        command
            .arg(input_dir)
            .arg(out_dir)
            .arg("--combined_pdf")
            .arg("--combined_md");
        debug!(?command, "Running annotation tool");

        let output = command
            .output()
            .map_err(|e| SyncError::Extraction(format!("failed to run remarks: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SyncError::Extraction(format!(
                "remarks exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(format!("{}{}", stdout, stderr))
    }
}

/// Files produced for one document; both absent when it had no annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedAnnotations {
    pub note: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
}

impl ExtractedAnnotations {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.pdf.is_none()
    }
}

/// Pulls a document from the device and runs the annotation tool on it
pub struct AnnotationExtractor<'a> {
    device: &'a dyn DeviceClient,
    tool: &'a dyn AnnotationTool,
}

impl<'a> AnnotationExtractor<'a> {
    pub fn new(device: &'a dyn DeviceClient, tool: &'a dyn AnnotationTool) -> Self {
        Self { device, tool }
    }

    /// Extract annotations for `device_path` into `work_dir`.
    ///
    /// Outputs are named after the document: `<name>.md` and
    /// `<name>_annotated.pdf`. Scratch files are removed whether or not
    /// extraction succeeds.
    pub fn extract(
        &self,
        device_path: &str,
        known: Option<&DocumentStat>,
        work_dir: &Path,
    ) -> Result<ExtractedAnnotations> {
        let scratch = tempfile::Builder::new().prefix("zotrm-extract").tempdir()?;

        let archive = self
            .device
            .get(device_path, scratch.path())
            .map_err(|e| SyncError::Extraction(format!("fetch {}: {}", device_path, e)))?;

        let stat = match known {
            Some(stat) => stat.clone(),
            None => self
                .device
                .stat(device_path)
                .map_err(|e| SyncError::Extraction(format!("stat {}: {}", device_path, e)))?,
        };
        let document = document_name(device_path);
        let display_name = stat.display_name.clone().unwrap_or_else(|| document.clone());

        let unpacked = scratch.path().join("unpacked");
        fs::create_dir_all(&unpacked)?;
        unzip(&archive, &unpacked)?;
        write_metadata(&unpacked, &stat, &display_name)?;

        let out_dir = scratch.path().join("out");
        fs::create_dir_all(&out_dir)?;
        let console = self.tool.run(&unpacked, &out_dir)?;
        if console.to_lowercase().contains(NO_ANNOTATIONS_MARKER) {
            info!("No annotations found in {}", device_path);
            return Ok(ExtractedAnnotations::default());
        }

        let produced = collect_files(&out_dir)?;
        let mut extracted = ExtractedAnnotations::default();
        if let Some(note) = pick_output(&produced, &display_name, "md") {
            let target = work_dir.join(format!("{}.md", document));
            fs::copy(note, &target)?;
            extracted.note = Some(target);
        }
        if let Some(pdf) = pick_output(&produced, &display_name, "pdf") {
            let target = work_dir.join(annotated_name(&document));
            fs::copy(pdf, &target)?;
            extracted.pdf = Some(target);
        }
        debug!(?extracted, "Extracted annotations from {}", device_path);
        Ok(extracted)
    }
}

/// Last path component without its `.pdf` extension
fn document_name(device_path: &str) -> String {
    let base = device_path.rsplit('/').next().unwrap_or(device_path);
    strip_pdf_extension(base).to_string()
}

fn unzip(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)
        .map_err(|e| SyncError::Extraction(format!("open {}: {}", archive.display(), e)))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| SyncError::Extraction(format!("read {}: {}", archive.display(), e)))?;
    zip.extract(dest)
        .map_err(|e| SyncError::Extraction(format!("unzip {}: {}", archive.display(), e)))
}

/// Minimal `<id>.metadata` descriptor the extraction tool needs
fn write_metadata(dir: &Path, stat: &DocumentStat, display_name: &str) -> Result<()> {
    let descriptor = json!({
        "deleted": false,
        "lastModified": stat.modified.timestamp_millis().to_string(),
        "metadatamodified": false,
        "modified": false,
        "parent": "",
        "pinned": false,
        "synced": true,
        "type": stat.doc_type,
        "version": 1,
        "visibleName": display_name,
    });
    let path = dir.join(format!("{}.metadata", stat.id));
    fs::write(path, serde_json::to_vec_pretty(&descriptor)?)?;
    Ok(())
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Prefer a file named after the document; otherwise the first with `ext`
fn pick_output<'p>(files: &'p [PathBuf], display_name: &str, ext: &str) -> Option<&'p PathBuf> {
    let with_ext: Vec<&PathBuf> = files
        .iter()
        .filter(|p| {
            p.extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        })
        .collect();
    with_ext
        .iter()
        .find(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(display_name))
        })
        .or(with_ext.first())
        .copied()
}
