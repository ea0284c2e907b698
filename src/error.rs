//! Error types for zotrm

use thiserror::Error;

/// Result type alias for zotrm operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for zotrm
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collection lookup failed: {0}")]
    CollectionLookup(String),

    #[error("Could not create directory {0} on remarkable")]
    DeviceCreate(String),

    #[error("Could not upload file {0} to remarkable")]
    Upload(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Annotation extraction failed: {0}")]
    Extraction(String),

    #[error("Library write failed: {0}")]
    LibraryWrite(String),

    #[error("Library error: {0}")]
    Library(String),

    #[error("Page transform failed: {0}")]
    Transform(String),

    #[error("Invalid device timestamp: {0}")]
    Timestamp(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "zotero-web")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// Whether the error aborts the whole run rather than a single record
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }

    /// Reclassify a failure raised while writing to the library.
    ///
    /// Transport and lookup errors seen mid-write leave the record in the same
    /// half-written state as a rejected write, so they are reported as one.
    pub fn into_library_write(self) -> SyncError {
        match self {
            SyncError::LibraryWrite(_) => self,
            other => SyncError::LibraryWrite(other.to_string()),
        }
    }

    /// Short class name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config",
            SyncError::CollectionLookup(_) => "collection_lookup",
            SyncError::DeviceCreate(_) => "device_create",
            SyncError::Upload(_) => "upload",
            SyncError::Device(_) => "device",
            SyncError::Extraction(_) => "extraction",
            SyncError::LibraryWrite(_) => "library_write",
            SyncError::Library(_) => "library",
            SyncError::Transform(_) => "transform",
            SyncError::Timestamp(_) => "timestamp",
            SyncError::Serialization(_) => "serialization",
            SyncError::Io(_) => "io",
            #[cfg(feature = "zotero-web")]
            SyncError::Http(_) => "http",
        }
    }
}
