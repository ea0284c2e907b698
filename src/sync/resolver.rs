//! Device folder and attachment resolution for library records

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::library::LibraryService;
use crate::types::{
    AttachmentRef, CollectionHierarchy, LibraryItem, LibraryRecord, LinkMode, ANNOTATED_SUFFIX,
    LINKED_PREFIX,
};

/// Maps library records to device folders and local PDF files
pub struct PathResolver<'a> {
    library: &'a dyn LibraryService,
    config: &'a Config,
}

impl<'a> PathResolver<'a> {
    pub fn new(library: &'a dyn LibraryService, config: &'a Config) -> Self {
        Self { library, config }
    }

    /// Device folders for a record, root to leaf.
    ///
    /// Only the record's first collection is used. Records outside any
    /// collection go to the configured default folder.
    pub fn resolve_hierarchy(&self, record: &LibraryRecord) -> Result<CollectionHierarchy> {
        let Some(first) = record.collections.first() else {
            return CollectionHierarchy::new(vec![self.config.remarkable.default_dir.clone()])
                .ok_or_else(|| SyncError::Config("remarkable.default_dir is empty".to_string()));
        };

        // Walk leaf to root
        let mut names = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first.clone());
        while let Some(key) = next {
            if !visited.insert(key.clone()) {
                return Err(SyncError::CollectionLookup(format!(
                    "collection cycle through {}",
                    key
                )));
            }
            let collection = self
                .library
                .collection(&key)
                .map_err(|e| SyncError::CollectionLookup(format!("{}: {}", key, e)))?
                .ok_or_else(|| SyncError::CollectionLookup(format!("{} not found", key)))?;
            names.push(collection.name);
            next = collection.parent;
        }
        names.reverse();

        let mut folders = self.config.remarkable.base_folders();
        folders.extend(names);
        CollectionHierarchy::new(folders)
            .ok_or_else(|| SyncError::CollectionLookup(format!("{} has no name", first)))
    }

    /// Local PDF files attached to a record, possibly empty.
    ///
    /// Children are visited in no particular order. Annotated copies written
    /// by earlier inbound passes are never returned.
    pub fn resolve_attachments(&self, record: &LibraryRecord) -> Result<Vec<AttachmentRef>> {
        let mut queue: VecDeque<LibraryItem> = VecDeque::from([record.clone()]);
        let mut found = Vec::new();

        while let Some(item) = queue.pop_front() {
            if item.is_note() {
                continue;
            }
            if !item.is_attachment() {
                queue.extend(self.library.children(&item.key)?);
                continue;
            }

            let Some(name) = item.stored_name() else {
                debug!(key = %item.key, "Attachment has no file name, skipping");
                continue;
            };
            if !is_source_pdf(name) {
                debug!(key = %item.key, name, "Not a source PDF, skipping");
                continue;
            }

            match name.strip_prefix(LINKED_PREFIX) {
                Some(relative) => {
                    if let Some(path) = self.find_linked(relative) {
                        found.push(AttachmentRef {
                            path,
                            item_key: item.key.clone(),
                            link_mode: LinkMode::Linked,
                        });
                    }
                }
                None => {
                    let matches = self.find_managed(name);
                    if matches.is_empty() {
                        warn!(name, "Cannot find file in library storage, skipping");
                    }
                    found.extend(matches.into_iter().map(|path| AttachmentRef {
                        path,
                        item_key: item.key.clone(),
                        link_mode: LinkMode::Managed,
                    }));
                }
            }
        }

        Ok(found)
    }

    fn find_linked(&self, relative: &str) -> Option<PathBuf> {
        let Some(root) = &self.config.zotero.attachment_dir else {
            warn!(relative, "Linked attachment but zotero.attachment_dir is not set");
            return None;
        };
        let path = root.join(relative);
        if path.is_file() {
            Some(path)
        } else {
            warn!(path = %path.display(), "Linked attachment missing on disk");
            None
        }
    }

    /// Every `<storage>/<KEY>/<file_name>` on disk.
    ///
    /// Managed files live under per-item generated folders that cannot be
    /// derived from metadata, so the storage tree is searched. All matches are
    /// returned, duplicates included.
    pub fn find_managed(&self, file_name: &str) -> Vec<PathBuf> {
        let storage = &self.config.zotero.storage_dir;
        let pattern = match Regex::new(&format!("^[A-Z0-9]+/{}$", regex::escape(file_name))) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(file_name, error = %e, "Cannot build storage search pattern");
                return Vec::new();
            }
        };

        let subdirs = match fs::read_dir(storage) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(storage = %storage.display(), error = %e, "Cannot read library storage");
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for subdir in subdirs.flatten() {
            let Ok(files) = fs::read_dir(subdir.path()) else {
                continue;
            };
            let subdir_name = subdir.file_name().to_string_lossy().into_owned();
            for file in files.flatten() {
                let relative = format!("{}/{}", subdir_name, file.file_name().to_string_lossy());
                if pattern.is_match(&relative) && file.path().is_file() {
                    matches.push(file.path());
                }
            }
        }
        matches.sort();
        matches
    }

    /// Library path for a file under the attachment root, e.g. `attachments:ml/x.pdf`
    pub fn linked_library_path(&self, local: &Path) -> Option<String> {
        let root = self.config.zotero.attachment_dir.as_ref()?;
        let relative = local.strip_prefix(root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("{}{}", LINKED_PREFIX, parts.join("/")))
    }
}

/// A PDF that is not one of our own annotated copies
fn is_source_pdf(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains(".pdf") && !lower.ends_with(ANNOTATED_SUFFIX)
}
