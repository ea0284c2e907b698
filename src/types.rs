//! Core types for zotrm

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Unique identifier for a library item or collection
pub type ItemKey = String;

/// Suffix marking an annotated copy produced by a previous inbound pass
pub const ANNOTATED_SUFFIX: &str = "_annotated.pdf";

/// Prefix the library uses for paths relative to the linked-attachment root
pub const LINKED_PREFIX: &str = "attachments:";

/// Kind of library item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Attachment,
    Note,
    /// Any bibliographic item type (journalArticle, book, ...)
    Regular(String),
}

impl ItemKind {
    pub fn from_item_type(item_type: &str) -> Self {
        match item_type {
            "attachment" => ItemKind::Attachment,
            "note" => ItemKind::Note,
            other => ItemKind::Regular(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Attachment => "attachment",
            ItemKind::Note => "note",
            ItemKind::Regular(t) => t,
        }
    }
}

/// How an attachment's file is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    /// Stored by the library under a generated subdirectory
    Managed,
    /// Stored relative to the user's attachment root
    Linked,
}

/// A library item: a record, one of its attachments, or a note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Library key
    pub key: ItemKey,
    /// Library version, used for optimistic concurrency on writes
    #[serde(default)]
    pub version: u64,
    pub kind: ItemKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Collection keys in library order
    #[serde(default)]
    pub collections: Vec<ItemKey>,
    /// Stored file name (managed attachments)
    #[serde(default)]
    pub filename: Option<String>,
    /// Stored path (linked attachments)
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub parent: Option<ItemKey>,
}

/// A top-level bibliographic record
pub type LibraryRecord = LibraryItem;

impl LibraryItem {
    pub fn is_attachment(&self) -> bool {
        self.kind == ItemKind::Attachment
    }

    pub fn is_note(&self) -> bool {
        self.kind == ItemKind::Note
    }

    /// File name from `filename`, falling back to `path`
    pub fn stored_name(&self) -> Option<&str> {
        self.filename.as_deref().or(self.path.as_deref())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A library collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub key: ItemKey,
    pub name: String,
    pub parent: Option<ItemKey>,
}

/// Device folder names from root to leaf, never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHierarchy(Vec<String>);

impl CollectionHierarchy {
    /// Build from root-to-leaf folder names; returns `None` when empty
    pub fn new(folders: Vec<String>) -> Option<Self> {
        if folders.is_empty() {
            None
        } else {
            Some(Self(folders))
        }
    }

    pub fn folders(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Absolute device path, e.g. `/Papers/ML`
    pub fn device_path(&self) -> String {
        let mut path = String::new();
        for folder in self.0.iter().filter(|f| !f.is_empty()) {
            path.push('/');
            path.push_str(folder);
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

/// A local PDF attachment and the library item it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Local filesystem path
    pub path: PathBuf,
    /// Key of the attachment item
    pub item_key: ItemKey,
    pub link_mode: LinkMode,
}

impl AttachmentRef {
    /// File name including extension
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without the `.pdf` extension; the device addresses documents this way
    pub fn stem(&self) -> String {
        strip_pdf_extension(&self.file_name()).to_string()
    }

    /// Local path of the annotated copy written beside a linked original
    pub fn annotated_sibling(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        dir.join(annotated_name(&self.stem()))
    }
}

/// `paper.pdf` -> `paper`, case-insensitive; other names are returned unchanged
pub fn strip_pdf_extension(name: &str) -> &str {
    let len = name.len();
    if len >= 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".pdf") {
        &name[..len - 4]
    } else {
        name
    }
}

/// File name of the annotated copy for a document stem
pub fn annotated_name(stem: &str) -> String {
    format!("{}{}", stem, ANNOTATED_SUFFIX)
}

/// Per-record sync state, persisted in the library as tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Untagged,
    ExportPending,
    Exported,
}

/// Tag names that encode [`SyncState`] in the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    pub export_tag: String,
    /// Without a post-export tag, exported records fall back to untagged
    pub post_export_tag: Option<String>,
}

impl TagConfig {
    /// Read the state encoded in a tag list
    pub fn state_of(&self, tags: &[String]) -> SyncState {
        if tags.iter().any(|t| *t == self.export_tag) {
            SyncState::ExportPending
        } else if self
            .post_export_tag
            .as_ref()
            .is_some_and(|post| tags.iter().any(|t| t == post))
        {
            SyncState::Exported
        } else {
            SyncState::Untagged
        }
    }

    /// Rewrite a tag list so it encodes `state`, keeping unrelated tags in order
    pub fn encode(&self, tags: &[String], state: SyncState) -> Vec<String> {
        let mut out: Vec<String> = tags
            .iter()
            .filter(|t| {
                **t != self.export_tag && Some(t.as_str()) != self.post_export_tag.as_deref()
            })
            .cloned()
            .collect();
        match state {
            SyncState::Untagged => {}
            SyncState::ExportPending => out.push(self.export_tag.clone()),
            SyncState::Exported => {
                if let Some(post) = &self.post_export_tag {
                    out.push(post.clone());
                }
            }
        }
        out
    }
}
