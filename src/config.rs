//! Configuration loading.
//!
//! Settings live in a TOML file (default `~/.zotrm/config.toml`). The file is
//! read once at startup; the resulting [`Config`] is immutable and handed to
//! each component by reference. Path values may use `~` and `$VARS`.
//!
//! ```toml
//! [zotero]
//! library_id = "123456"
//! api_key = "..."
//! storage_dir = "~/Zotero/storage"
//! send_tag = "to_remarkable"
//! replace_tag = "on_remarkable"
//!
//! [rmapi]
//! path = "~/go/bin/rmapi"
//!
//! [remarkable]
//! default_dir = "Zotero"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::types::TagConfig;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "ZOTRM_CONFIG";

/// Reference library settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoteroConfig {
    pub library_id: String,
    /// "user" or "group"
    #[serde(default = "default_library_type")]
    pub library_type: String,
    pub api_key: String,
    /// Root of the library's managed storage tree
    pub storage_dir: PathBuf,
    /// Root that linked attachment paths are relative to
    #[serde(default)]
    pub attachment_dir: Option<PathBuf>,
    pub send_tag: String,
    #[serde(default)]
    pub replace_tag: Option<String>,
}

fn default_library_type() -> String {
    "user".to_string()
}

/// Device CLI settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RmapiConfig {
    pub path: PathBuf,
}

/// Device folder layout
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemarkableConfig {
    /// Folder for records that belong to no collection
    pub default_dir: String,
    /// Folder every collection hierarchy is placed under
    #[serde(default)]
    pub base_dir: Option<String>,
}

impl RemarkableConfig {
    /// Base folder components, or empty when unset or the device root
    pub fn base_folders(&self) -> Vec<String> {
        self.base_dir
            .as_deref()
            .map(|base| {
                base.split('/')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Annotation extraction tool settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemarksConfig {
    /// Source directory (run as a python module) or executable
    pub path: PathBuf,
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_python() -> String {
    "python3".to_string()
}

/// Landscape transform settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_transform_command")]
    pub command: String,
    /// `{input}` and `{output}` are replaced with file paths
    #[serde(default = "default_transform_args")]
    pub args: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            command: default_transform_command(),
            args: default_transform_args(),
        }
    }
}

fn default_transform_command() -> String {
    "qpdf".to_string()
}

fn default_transform_args() -> Vec<String> {
    vec![
        "--rotate=+90".to_string(),
        "{input}".to_string(),
        "{output}".to_string(),
    ]
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub zotero: ZoteroConfig,
    pub rmapi: RmapiConfig,
    pub remarkable: RemarkableConfig,
    /// Without it, inbound sync cannot run
    #[serde(default)]
    pub remarks: Option<RemarksConfig>,
    #[serde(default)]
    pub transform: Option<TransformConfig>,
}

impl Config {
    /// `~/.zotrm/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zotrm")
            .join("config.toml")
    }

    /// Load from an explicit path
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        info!("Loading config from: {}", path.display());
        content.parse()
    }

    /// Load from `path` if given, else the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_file(&Self::default_config_path()),
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.zotero.storage_dir = expand(&self.zotero.storage_dir)?;
        if let Some(dir) = &self.zotero.attachment_dir {
            self.zotero.attachment_dir = Some(expand(dir)?);
        }
        self.rmapi.path = expand(&self.rmapi.path)?;
        if let Some(remarks) = &mut self.remarks {
            remarks.path = expand(&remarks.path)?;
        }
        Ok(())
    }

    /// Reject values that would make every sync step fail
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("zotero.library_id", &self.zotero.library_id),
            ("zotero.api_key", &self.zotero.api_key),
            ("zotero.send_tag", &self.zotero.send_tag),
            ("remarkable.default_dir", &self.remarkable.default_dir),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{} must not be empty", name)));
            }
        }

        if !matches!(self.zotero.library_type.as_str(), "user" | "group") {
            return Err(SyncError::Config(format!(
                "zotero.library_type must be \"user\" or \"group\", got {:?}",
                self.zotero.library_type
            )));
        }

        if self.zotero.replace_tag.as_deref() == Some(self.zotero.send_tag.as_str()) {
            return Err(SyncError::Config(
                "zotero.replace_tag must differ from zotero.send_tag".to_string(),
            ));
        }

        Ok(())
    }

    /// Tag names encoding sync state
    pub fn tag_config(&self) -> TagConfig {
        TagConfig {
            export_tag: self.zotero.send_tag.clone(),
            post_export_tag: self.zotero.replace_tag.clone(),
        }
    }
}

impl std::str::FromStr for Config {
    type Err = SyncError;

    fn from_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| SyncError::Config(format!("Failed to expand {}: {}", raw, e)))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[zotero]
library_id = "5276282"
api_key = "secret"
storage_dir = "/data/zotero/storage"
send_tag = "to_rm"
replace_tag = "on_rm"

[rmapi]
path = "/usr/local/bin/rmapi"

[remarkable]
default_dir = "Zotero"
base_dir = "/"
"#;

    #[test]
    fn test_parse_minimal() {
        let config: Config = MINIMAL.parse().unwrap();
        assert_eq!(config.zotero.library_type, "user");
        assert_eq!(config.zotero.storage_dir, PathBuf::from("/data/zotero/storage"));
        assert!(config.remarks.is_none());
        assert!(config.remarkable.base_folders().is_empty());

        let tags = config.tag_config();
        assert_eq!(tags.export_tag, "to_rm");
        assert_eq!(tags.post_export_tag.as_deref(), Some("on_rm"));
    }

    #[test]
    fn test_missing_section_is_config_error() {
        let err = "[zotero]\nlibrary_id = \"1\"".parse::<Config>().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_empty_send_tag_rejected() {
        let content = MINIMAL.replace("send_tag = \"to_rm\"", "send_tag = \"\"");
        let err = content.parse::<Config>().unwrap_err();
        assert!(err.to_string().contains("zotero.send_tag"));
    }

    #[test]
    fn test_same_send_and_replace_tag_rejected() {
        let content = MINIMAL.replace("replace_tag = \"on_rm\"", "replace_tag = \"to_rm\"");
        assert!(content.parse::<Config>().is_err());
    }

    #[test]
    fn test_base_dir_components() {
        let remarkable = RemarkableConfig {
            default_dir: "Zotero".to_string(),
            base_dir: Some("/Library/Papers/".to_string()),
        };
        assert_eq!(remarkable.base_folders(), vec!["Library", "Papers"]);
    }

    #[test]
    fn test_transform_defaults() {
        let content = format!("{}\n[transform]\n", MINIMAL);
        let config: Config = content.parse().unwrap();
        assert_eq!(config.transform, Some(TransformConfig::default()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
