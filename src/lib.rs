//! zotrm - Zotero <-> reMarkable sync
//!
//! Sends papers tagged in a Zotero library to a reMarkable tablet, mirroring
//! the collection hierarchy as device folders, and pulls annotations made on
//! the tablet back into the library.

pub mod config;
pub mod device;
pub mod error;
pub mod library;
pub mod sync;
pub mod types;

pub use config::Config;
pub use error::{Result, SyncError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
