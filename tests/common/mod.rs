//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use zotrm::device::{parse_device_timestamp, DeviceClient, DocumentStat};
use zotrm::library::LibraryService;
use zotrm::sync::AnnotationTool;
use zotrm::{Collection, Config, ItemKey, ItemKind, LibraryItem, Result, SyncError};

pub const SEND_TAG: &str = "to_rm";
pub const POST_TAG: &str = "on_rm";

// ============================================================================
// Library
// ============================================================================

#[derive(Default)]
pub struct FakeLibrary {
    pub records: RefCell<Vec<LibraryItem>>,
    pub children: RefCell<HashMap<ItemKey, Vec<LibraryItem>>>,
    pub collections: HashMap<ItemKey, Collection>,
    pub tag_updates: RefCell<Vec<(ItemKey, Vec<String>)>>,
    pub notes: RefCell<Vec<(ItemKey, String)>>,
    pub linked: RefCell<Vec<(ItemKey, String, String)>>,
    /// (parent, uploaded file name, contents)
    pub uploads: RefCell<Vec<(ItemKey, String, Vec<u8>)>>,
    /// (attachment key, contents)
    pub replaced: RefCell<Vec<(ItemKey, Vec<u8>)>>,
    /// Error returned by `create_note`, if any
    pub note_failure: Option<fn(String) -> SyncError>,
    next_key: Cell<u32>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, key: &str, name: &str, parent: Option<&str>) -> Self {
        self.collections.insert(
            key.to_string(),
            Collection {
                key: key.to_string(),
                name: name.to_string(),
                parent: parent.map(str::to_string),
            },
        );
        self
    }

    pub fn with_record(self, record: LibraryItem, children: Vec<LibraryItem>) -> Self {
        self.children
            .borrow_mut()
            .insert(record.key.clone(), children);
        self.records.borrow_mut().push(record);
        self
    }

    pub fn failing_notes(mut self) -> Self {
        self.note_failure = Some(SyncError::LibraryWrite);
        self
    }

    /// Notes fail the way a dropped connection does, not as a rejected write
    pub fn unreachable_notes(mut self) -> Self {
        self.note_failure = Some(SyncError::Library);
        self
    }

    pub fn tags_of(&self, key: &str) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.tags.clone())
            .unwrap_or_default()
    }

    pub fn set_tags(&self, key: &str, tags: &[&str]) {
        if let Some(record) = self.records.borrow_mut().iter_mut().find(|r| r.key == key) {
            record.tags = tags.iter().map(|t| t.to_string()).collect();
        }
    }

    /// Every write except tag updates
    pub fn content_writes(&self) -> usize {
        self.notes.borrow().len()
            + self.linked.borrow().len()
            + self.uploads.borrow().len()
            + self.replaced.borrow().len()
    }

    fn new_key(&self) -> ItemKey {
        let n = self.next_key.get() + 1;
        self.next_key.set(n);
        format!("NEW{}", n)
    }

    fn add_child(&self, parent: &str, child: LibraryItem) {
        self.children
            .borrow_mut()
            .entry(parent.to_string())
            .or_default()
            .push(child);
    }
}

impl LibraryService for FakeLibrary {
    fn top_items(&self, tag: &str) -> Result<Vec<LibraryItem>> {
        Ok(self
            .records
            .borrow()
            .iter()
            .filter(|r| r.has_tag(tag))
            .cloned()
            .collect())
    }

    fn children(&self, key: &str) -> Result<Vec<LibraryItem>> {
        Ok(self.children.borrow().get(key).cloned().unwrap_or_default())
    }

    fn collection(&self, key: &str) -> Result<Option<Collection>> {
        Ok(self.collections.get(key).cloned())
    }

    fn update_tags(&self, item: &LibraryItem, tags: &[String]) -> Result<()> {
        self.tag_updates
            .borrow_mut()
            .push((item.key.clone(), tags.to_vec()));
        if let Some(record) = self
            .records
            .borrow_mut()
            .iter_mut()
            .find(|r| r.key == item.key)
        {
            record.tags = tags.to_vec();
        }
        Ok(())
    }

    fn create_note(&self, parent: &str, html: &str) -> Result<ItemKey> {
        if let Some(failure) = self.note_failure {
            return Err(failure("note rejected".to_string()));
        }
        self.notes
            .borrow_mut()
            .push((parent.to_string(), html.to_string()));
        Ok(self.new_key())
    }

    fn create_linked_attachment(&self, parent: &str, path: &str, title: &str) -> Result<ItemKey> {
        let key = self.new_key();
        self.linked
            .borrow_mut()
            .push((parent.to_string(), path.to_string(), title.to_string()));
        self.add_child(parent, linked_attachment(&key, path));
        Ok(key)
    }

    fn upload_attachment(&self, parent: &str, file: &Path) -> Result<ItemKey> {
        let key = self.new_key();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.uploads
            .borrow_mut()
            .push((parent.to_string(), name.clone(), fs::read(file)?));
        self.add_child(parent, managed_attachment(&key, &name));
        Ok(key)
    }

    fn replace_attachment_file(&self, attachment: &LibraryItem, file: &Path) -> Result<()> {
        self.replaced
            .borrow_mut()
            .push((attachment.key.clone(), fs::read(file)?));
        Ok(())
    }
}

pub fn record(key: &str, tags: &[&str], collections: &[&str]) -> LibraryItem {
    LibraryItem {
        key: key.to_string(),
        version: 1,
        kind: ItemKind::Regular("journalArticle".to_string()),
        title: format!("Paper {}", key),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        collections: collections.iter().map(|c| c.to_string()).collect(),
        filename: None,
        path: None,
        parent: None,
    }
}

pub fn managed_attachment(key: &str, filename: &str) -> LibraryItem {
    LibraryItem {
        key: key.to_string(),
        version: 1,
        kind: ItemKind::Attachment,
        title: filename.to_string(),
        tags: vec![],
        collections: vec![],
        filename: Some(filename.to_string()),
        path: None,
        parent: None,
    }
}

pub fn linked_attachment(key: &str, path: &str) -> LibraryItem {
    LibraryItem {
        key: key.to_string(),
        version: 1,
        kind: ItemKind::Attachment,
        title: path.to_string(),
        tags: vec![],
        collections: vec![],
        filename: None,
        path: Some(path.to_string()),
        parent: None,
    }
}

pub fn note(key: &str) -> LibraryItem {
    LibraryItem {
        key: key.to_string(),
        version: 1,
        kind: ItemKind::Note,
        title: String::new(),
        tags: vec![],
        collections: vec![],
        filename: None,
        path: None,
        parent: None,
    }
}

// ============================================================================
// Device
// ============================================================================

/// Device holding a set of extension-less paths, logging every call
#[derive(Default)]
pub struct FakeDevice {
    pub entries: RefCell<HashSet<String>>,
    pub modified: RefCell<HashMap<String, DateTime<Utc>>>,
    pub calls: RefCell<Vec<String>>,
    /// File names whose upload fails
    pub failing_puts: HashSet<String>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, path: &str) -> Self {
        self.entries.borrow_mut().insert(path.to_string());
        self
    }

    /// A document with a device-side modification time
    pub fn with_document(self, path: &str, modified: &str) -> Self {
        self.entries.borrow_mut().insert(path.to_string());
        self.modified
            .borrow_mut()
            .insert(path.to_string(), ts(modified));
        self
    }

    pub fn failing_put(mut self, file_name: &str) -> Self {
        self.failing_puts.insert(file_name.to_string());
        self
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn puts(&self) -> usize {
        self.calls_starting("put ").len()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

fn without_pdf(path: &str) -> &str {
    zotrm::strip_pdf_extension(path)
}

fn write_archive(path: &Path) -> zip::result::ZipResult<()> {
    let mut zip = zip::ZipWriter::new(fs::File::create(path)?);
    zip.start_file("doc-id.content", zip::write::SimpleFileOptions::default())?;
    zip.write_all(b"{}")?;
    zip.finish()?;
    Ok(())
}

impl DeviceClient for FakeDevice {
    fn exists(&self, path: &str) -> Result<bool> {
        self.log(format!("find {}", path));
        Ok(self.entries.borrow().contains(path))
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.log(format!("mkdir {}", path));
        self.entries.borrow_mut().insert(path.to_string());
        Ok(())
    }

    fn put(&self, local: &Path, remote_dir: &str) -> Result<()> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log(format!("put {} {}", name, remote_dir));
        if self.failing_puts.contains(&name) {
            return Err(SyncError::Upload(name));
        }
        let path = format!("{}/{}", remote_dir.trim_end_matches('/'), without_pdf(&name));
        self.modified.borrow_mut().insert(path.clone(), Utc::now());
        self.entries.borrow_mut().insert(path);
        Ok(())
    }

    fn get(&self, remote: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.log(format!("get {}", remote));
        let name = remote.rsplit('/').next().unwrap_or(remote);
        let archive = dest_dir.join(format!("{}.zip", without_pdf(name)));
        write_archive(&archive).map_err(|e| SyncError::Device(e.to_string()))?;
        Ok(archive)
    }

    fn stat(&self, remote: &str) -> Result<DocumentStat> {
        self.log(format!("stat {}", remote));
        let key = without_pdf(remote);
        let modified = self
            .modified
            .borrow()
            .get(key)
            .copied()
            .ok_or_else(|| SyncError::Device(format!("no such document {}", remote)))?;
        Ok(DocumentStat {
            id: "doc-id".to_string(),
            doc_type: "DocumentType".to_string(),
            display_name: Some(key.rsplit('/').next().unwrap_or(key).to_string()),
            modified,
            fields: HashMap::new(),
        })
    }
}

// ============================================================================
// Annotation tool
// ============================================================================

/// Writes fixed outputs, or reports that nothing was annotated
pub struct FakeTool {
    pub annotated: bool,
    pub runs: Cell<usize>,
}

impl FakeTool {
    pub fn annotated() -> Self {
        Self {
            annotated: true,
            runs: Cell::new(0),
        }
    }

    pub fn without_annotations() -> Self {
        Self {
            annotated: false,
            runs: Cell::new(0),
        }
    }
}

impl AnnotationTool for FakeTool {
    fn run(&self, input_dir: &Path, out_dir: &Path) -> Result<String> {
        self.runs.set(self.runs.get() + 1);
        if !input_dir.join("doc-id.metadata").is_file() {
            return Err(SyncError::Extraction("metadata missing".to_string()));
        }
        if !self.annotated {
            return Ok("No annotations found\n".to_string());
        }
        fs::write(out_dir.join("out.md"), "## Highlights\n\n> learned features\n")?;
        fs::write(out_dir.join("out.pdf"), b"%PDF-annotated")?;
        Ok("Wrote combined outputs\n".to_string())
    }
}

// ============================================================================
// Local files and config
// ============================================================================

/// Managed storage and linked-attachment roots in a temp dir
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("storage")).unwrap();
        fs::create_dir_all(root.path().join("linked")).unwrap();
        Self { root }
    }

    pub fn storage(&self) -> PathBuf {
        self.root.path().join("storage")
    }

    pub fn linked(&self) -> PathBuf {
        self.root.path().join("linked")
    }

    /// `<storage>/<subdir>/<name>`
    pub fn managed_file(&self, subdir: &str, name: &str) -> PathBuf {
        let dir = self.storage().join(subdir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"%PDF-original").unwrap();
        path
    }

    /// `<linked>/<relative>`
    pub fn linked_file(&self, relative: &str) -> PathBuf {
        let path = self.linked().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"%PDF-original").unwrap();
        path
    }

    pub fn config(&self, replace_tag: Option<&str>) -> Config {
        let replace = replace_tag
            .map(|t| format!("replace_tag = \"{}\"\n", t))
            .unwrap_or_default();
        let toml = format!(
            r#"
[zotero]
library_id = "1"
api_key = "key"
storage_dir = "{storage}"
attachment_dir = "{linked}"
send_tag = "{send}"
{replace}
[rmapi]
path = "rmapi"

[remarkable]
default_dir = "Zotero"
"#,
            storage = self.storage().display(),
            linked = self.linked().display(),
            send = SEND_TAG,
        );
        toml.parse().unwrap()
    }
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    parse_device_timestamp(raw).unwrap()
}

pub fn set_mtime(path: &Path, raw: &str) {
    let time: SystemTime = ts(raw).into();
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}
