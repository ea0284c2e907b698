//! Device document metadata and timestamp handling

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Result, SyncError};

/// Key the device CLI prints for the display name (sic)
const DISPLAY_NAME_KEYS: [&str; 2] = ["VissibleName", "VisibleName"];
const MODIFIED_KEY: &str = "ModifiedClient";

/// Metadata reported by the device for one document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStat {
    /// Device-internal document id
    pub id: String,
    /// e.g. `DocumentType` or `CollectionType`
    pub doc_type: String,
    pub display_name: Option<String>,
    pub modified: DateTime<Utc>,
    /// Every `Key:value` pair as printed
    pub fields: HashMap<String, String>,
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[{\s](\w+):([^\s}]*)").expect("valid stat regex"))
}

impl DocumentStat {
    /// Parse `stat` output: a header line, then a `{Key:value ...}` record
    pub fn parse(output: &str) -> Result<Self> {
        let record = output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with('{'))
            .ok_or_else(|| SyncError::Device(format!("no stat record in: {}", output.trim())))?;

        let fields: HashMap<String, String> = field_regex()
            .captures_iter(record)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        if fields.is_empty() {
            return Err(SyncError::Device(format!("could not parse stat: {}", record)));
        }

        let id = fields
            .get("ID")
            .cloned()
            .ok_or_else(|| SyncError::Device("stat has no ID".to_string()))?;
        let modified_raw = fields
            .get(MODIFIED_KEY)
            .ok_or_else(|| SyncError::Device(format!("stat has no {}", MODIFIED_KEY)))?;
        let modified = parse_device_timestamp(modified_raw)?;

        Ok(Self {
            id,
            doc_type: fields
                .get("Type")
                .cloned()
                .unwrap_or_else(|| "DocumentType".to_string()),
            display_name: DISPLAY_NAME_KEYS
                .iter()
                .find_map(|key| fields.get(*key))
                .filter(|name| !name.is_empty())
                .cloned(),
            modified,
            fields,
        })
    }
}

/// Rewrite a device timestamp into `%Y-%m-%dT%H:%M:%S%.6f%:z` form.
///
/// The device prints a bare `Z` for UTC and trims trailing zeros from the
/// fractional seconds.
pub fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    let (body, offset) = if let Some(body) = raw.strip_suffix('Z').or(raw.strip_suffix('z')) {
        (body, "+00:00".to_string())
    } else {
        // Offset starts at the last sign after the time separator
        let time_start = raw.find('T').map(|i| i + 1).unwrap_or(0);
        match raw[time_start..].rfind(|c: char| c == '+' || c == '-') {
            Some(i) => {
                let (body, offset) = raw.split_at(time_start + i);
                let offset = if offset.len() == 5 && offset[1..].bytes().all(|b| b.is_ascii_digit()) {
                    format!("{}:{}", &offset[..3], &offset[3..])
                } else {
                    offset.to_string()
                };
                (body, offset)
            }
            None => (raw, "+00:00".to_string()),
        }
    };

    let (seconds, fraction) = match body.split_once('.') {
        Some((seconds, fraction)) => (seconds, fraction),
        None => (body, ""),
    };
    let mut fraction: String = fraction.chars().take(6).collect();
    while fraction.len() < 6 {
        fraction.push('0');
    }

    format!("{}.{}{}", seconds, fraction, offset)
}

/// Parse a device timestamp into UTC
pub fn parse_device_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let normalized = normalize_timestamp(raw);
    DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.6f%:z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Timestamp(format!("{} ({})", raw, e)))
}
