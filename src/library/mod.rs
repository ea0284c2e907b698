//! Reference library boundary.
//!
//! The sync engine only talks to the library through [`LibraryService`]. Tag
//! membership is the only sync state the library persists for us; see
//! [`crate::types::TagConfig`].

#[cfg(feature = "zotero-web")]
mod zotero;

#[cfg(feature = "zotero-web")]
pub use zotero::ZoteroClient;

use std::path::Path;

use crate::error::Result;
use crate::types::{Collection, ItemKey, LibraryItem, LibraryRecord};

/// Operations the sync engine consumes from the reference library
pub trait LibraryService {
    /// Top-level records carrying `tag`
    fn top_items(&self, tag: &str) -> Result<Vec<LibraryRecord>>;

    /// Direct children (attachments and notes) of an item
    fn children(&self, key: &str) -> Result<Vec<LibraryItem>>;

    /// Collection by key; `None` when the library has no such collection
    fn collection(&self, key: &str) -> Result<Option<Collection>>;

    /// Replace the tag set of an item
    fn update_tags(&self, item: &LibraryItem, tags: &[String]) -> Result<()>;

    /// Create a child note holding `html`
    fn create_note(&self, parent: &str, html: &str) -> Result<ItemKey>;

    /// Create a child attachment pointing at a linked file
    fn create_linked_attachment(&self, parent: &str, path: &str, title: &str) -> Result<ItemKey>;

    /// Create a child attachment and upload `file` into managed storage
    fn upload_attachment(&self, parent: &str, file: &Path) -> Result<ItemKey>;

    /// Replace the stored file of an existing managed attachment
    fn replace_attachment_file(&self, attachment: &LibraryItem, file: &Path) -> Result<()>;
}
