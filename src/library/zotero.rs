//! Zotero Web API v3 client

use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::LibraryService;
use crate::config::ZoteroConfig;
use crate::error::{Result, SyncError};
use crate::types::{Collection, ItemKey, ItemKind, LibraryItem, LibraryRecord};

const API_BASE: &str = "https://api.zotero.org";
const API_VERSION: &str = "3";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ApiItem {
    key: String,
    #[serde(default)]
    version: u64,
    data: ApiItemData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiItemData {
    item_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    tags: Vec<ApiTag>,
    #[serde(default)]
    collections: Vec<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    parent_item: Option<String>,
    #[serde(default)]
    md5: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct ApiTag {
    tag: String,
    /// `1` marks a tag added automatically on import
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    tag_type: Option<u8>,
}

/// Tag list for a PATCH: names in `tags`, keeping the stored form of any
/// tag the item already carries
fn tag_payload(current: &[ApiTag], tags: &[String]) -> Vec<ApiTag> {
    tags.iter()
        .map(|name| {
            current
                .iter()
                .find(|t| &t.tag == name)
                .cloned()
                .unwrap_or_else(|| ApiTag {
                    tag: name.clone(),
                    tag_type: None,
                })
        })
        .collect()
}

impl From<ApiItem> for LibraryItem {
    fn from(item: ApiItem) -> Self {
        LibraryItem {
            key: item.key,
            version: item.version,
            kind: ItemKind::from_item_type(&item.data.item_type),
            title: item.data.title,
            tags: item.data.tags.into_iter().map(|t| t.tag).collect(),
            collections: item.data.collections,
            filename: item.data.filename,
            path: item.data.path,
            parent: item.data.parent_item,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCollection {
    key: String,
    data: ApiCollectionData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCollectionData {
    name: String,
    /// Either `false` or the parent key
    #[serde(default)]
    parent_collection: Value,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    successful: HashMap<String, Value>,
    #[serde(default)]
    failed: HashMap<String, Value>,
}

/// Upload authorization returned by `POST items/{key}/file`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadAuth {
    #[serde(default)]
    exists: Option<u8>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    suffix: Option<String>,
    #[serde(default)]
    upload_key: Option<String>,
}

/// Blocking Zotero Web API client
pub struct ZoteroClient {
    http: Client,
    base_url: String,
    /// `users/<id>` or `groups/<id>`
    library_prefix: String,
    api_key: String,
}

impl ZoteroClient {
    /// Create a client for the configured library
    pub fn new(config: &ZoteroConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("zotrm/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let library_prefix = match config.library_type.as_str() {
            "group" => format!("groups/{}", config.library_id),
            _ => format!("users/{}", config.library_id),
        };
        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
            library_prefix,
            api_key: config.api_key.clone(),
        })
    }

    /// Point the client at another API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.library_prefix, path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", API_VERSION)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(url, "GET");
        let response = self.request(self.http.get(url)).query(query).send()?;
        let response = check(response, SyncError::Library)?;
        Ok(response.json()?)
    }

    fn get_items(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<LibraryItem>> {
        let url = self.url(path);
        let mut items = Vec::new();
        let mut start = 0;
        loop {
            let mut page_query = query.to_vec();
            page_query.push(("start", start.to_string()));
            page_query.push(("limit", PAGE_SIZE.to_string()));
            let page: Vec<ApiItem> = self.get_json(&url, &page_query)?;
            let count = page.len();
            items.extend(page.into_iter().map(LibraryItem::from));
            if count < PAGE_SIZE {
                break;
            }
            start += PAGE_SIZE;
        }
        Ok(items)
    }

    /// Empty item of the given type, as the API expects it on creation
    pub fn item_template(&self, item_type: &str, link_mode: Option<&str>) -> Result<Value> {
        let url = format!("{}/items/new", self.base_url);
        let mut query = vec![("itemType", item_type.to_string())];
        if let Some(mode) = link_mode {
            query.push(("linkMode", mode.to_string()));
        }
        self.get_json(&url, &query)
    }

    fn create_item(&self, item: Value) -> Result<ItemKey> {
        let url = self.url("items");
        debug!(url, "POST");
        let response = self
            .request(self.http.post(&url))
            .json(&vec![item])
            .send()?;
        let response = check(response, SyncError::LibraryWrite)?;
        let written: WriteResponse = response.json()?;

        if let Some(failure) = written.failed.get("0") {
            return Err(SyncError::LibraryWrite(failure.to_string()));
        }
        written
            .successful
            .get("0")
            .and_then(|item| item.get("key"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::LibraryWrite("create not acknowledged".to_string()))
    }

    fn get_item(&self, key: &str) -> Result<ApiItem> {
        self.get_json(&self.url(&format!("items/{}", key)), &[])
    }

    /// Zotero's three-step file upload: authorize, send bytes, register
    fn upload_file(&self, key: &str, file: &Path, previous_md5: Option<&str>) -> Result<()> {
        let bytes = std::fs::read(file)?;
        let digest = format!("{:x}", md5::compute(&bytes));
        let mtime = std::fs::metadata(file)?
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let url = self.url(&format!("items/{}/file", key));
        let precondition = |builder: RequestBuilder| match previous_md5 {
            Some(md5) => builder.header("If-Match", md5.to_string()),
            None => builder.header("If-None-Match", "*"),
        };

        let form = [
            ("md5", digest.clone()),
            ("filename", filename),
            ("filesize", bytes.len().to_string()),
            ("mtime", mtime.to_string()),
        ];
        let response = precondition(self.request(self.http.post(&url)))
            .form(&form)
            .send()?;
        let auth: UploadAuth = check(response, SyncError::LibraryWrite)?.json()?;
        if auth.exists == Some(1) {
            debug!(key, "file already stored");
            return Ok(());
        }

        let (Some(upload_url), Some(upload_key)) = (auth.url, auth.upload_key) else {
            return Err(SyncError::LibraryWrite(format!(
                "no upload authorization for {}",
                key
            )));
        };
        let mut body = auth.prefix.unwrap_or_default().into_bytes();
        body.extend_from_slice(&bytes);
        body.extend_from_slice(auth.suffix.unwrap_or_default().as_bytes());

        let mut upload = self.http.post(&upload_url).body(body);
        if let Some(content_type) = auth.content_type {
            upload = upload.header("Content-Type", content_type);
        }
        check(upload.send()?, SyncError::LibraryWrite)?;

        let response = precondition(self.request(self.http.post(&url)))
            .form(&[("upload", upload_key)])
            .send()?;
        check(response, SyncError::LibraryWrite)?;
        Ok(())
    }

    fn patch_tags(&self, item: &LibraryItem, tags: &[String]) -> Result<()> {
        let current = self.get_item(&item.key)?;
        let url = self.url(&format!("items/{}", item.key));
        let body = json!({ "tags": tag_payload(&current.data.tags, tags) });
        debug!(url, "PATCH");
        let response = self
            .request(self.http.patch(&url))
            .header("If-Unmodified-Since-Version", item.version.to_string())
            .json(&body)
            .send()?;
        check(response, SyncError::LibraryWrite)?;
        Ok(())
    }

    fn post_note(&self, parent: &str, html: &str) -> Result<ItemKey> {
        let mut note = self.item_template("note", None)?;
        note["parentItem"] = json!(parent);
        note["note"] = json!(html);
        self.create_item(note)
    }

    fn post_linked_attachment(&self, parent: &str, path: &str, title: &str) -> Result<ItemKey> {
        let mut attachment = self.item_template("attachment", Some("linked_file"))?;
        attachment["parentItem"] = json!(parent);
        attachment["title"] = json!(title);
        attachment["path"] = json!(path);
        attachment["contentType"] = json!("application/pdf");
        self.create_item(attachment)
    }

    fn post_stored_attachment(&self, parent: &str, file: &Path) -> Result<ItemKey> {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SyncError::LibraryWrite(format!("no file name: {}", file.display())))?;
        let mut attachment = self.item_template("attachment", Some("imported_file"))?;
        attachment["parentItem"] = json!(parent);
        attachment["title"] = json!(filename);
        attachment["filename"] = json!(filename);
        attachment["contentType"] = json!("application/pdf");
        let key = self.create_item(attachment)?;
        self.upload_file(&key, file, None)?;
        Ok(key)
    }

    fn replace_stored_file(&self, attachment: &LibraryItem, file: &Path) -> Result<()> {
        let current = self.get_item(&attachment.key)?;
        self.upload_file(&attachment.key, file, current.data.md5.as_deref())
    }
}

fn check(response: Response, error: fn(String) -> SyncError) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let url = response.url().to_string();
        let body = response.text().unwrap_or_default();
        Err(error(format!("{} {}: {}", status, url, body.trim())))
    }
}

impl LibraryService for ZoteroClient {
    fn top_items(&self, tag: &str) -> Result<Vec<LibraryRecord>> {
        self.get_items("items/top", &[("tag", tag.to_string())])
    }

    fn children(&self, key: &str) -> Result<Vec<LibraryItem>> {
        self.get_items(&format!("items/{}/children", key), &[])
    }

    fn collection(&self, key: &str) -> Result<Option<Collection>> {
        let url = self.url(&format!("collections/{}", key));
        debug!(url, "GET");
        let response = self.request(self.http.get(&url)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let collection: ApiCollection = check(response, SyncError::Library)?.json()?;
        Ok(Some(Collection {
            key: collection.key,
            name: collection.data.name,
            parent: collection
                .data
                .parent_collection
                .as_str()
                .map(str::to_string),
        }))
    }

    // Write methods report any failure as a library write
    fn update_tags(&self, item: &LibraryItem, tags: &[String]) -> Result<()> {
        self.patch_tags(item, tags)
            .map_err(SyncError::into_library_write)
    }

    fn create_note(&self, parent: &str, html: &str) -> Result<ItemKey> {
        self.post_note(parent, html)
            .map_err(SyncError::into_library_write)
    }

    fn create_linked_attachment(&self, parent: &str, path: &str, title: &str) -> Result<ItemKey> {
        self.post_linked_attachment(parent, path, title)
            .map_err(SyncError::into_library_write)
    }

    fn upload_attachment(&self, parent: &str, file: &Path) -> Result<ItemKey> {
        self.post_stored_attachment(parent, file)
            .map_err(SyncError::into_library_write)
    }

    fn replace_attachment_file(&self, attachment: &LibraryItem, file: &Path) -> Result<()> {
        self.replace_stored_file(attachment, file)
            .map_err(SyncError::into_library_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_conversion() {
        let raw = r#"{
            "key": "ABCD2345",
            "version": 42,
            "data": {
                "itemType": "attachment",
                "title": "Full Text PDF",
                "tags": [{"tag": "to_rm"}, {"tag": "ml", "type": 1}],
                "filename": "Smith 2020.pdf",
                "parentItem": "PARENT01",
                "linkMode": "imported_file"
            }
        }"#;
        let item: LibraryItem = serde_json::from_str::<ApiItem>(raw).unwrap().into();
        assert_eq!(item.kind, ItemKind::Attachment);
        assert_eq!(item.version, 42);
        assert_eq!(item.tags, vec!["to_rm", "ml"]);
        assert_eq!(item.stored_name(), Some("Smith 2020.pdf"));
        assert_eq!(item.parent.as_deref(), Some("PARENT01"));
    }

    #[test]
    fn test_tag_payload_keeps_automatic_tags() {
        let current: Vec<ApiTag> = serde_json::from_str(
            r#"[{"tag": "to_rm"}, {"tag": "Neural networks", "type": 1}, {"tag": "ml"}]"#,
        )
        .unwrap();
        let tags = vec![
            "Neural networks".to_string(),
            "ml".to_string(),
            "on_rm".to_string(),
        ];

        let payload = serde_json::to_value(tag_payload(&current, &tags)).unwrap();

        assert_eq!(
            payload,
            json!([
                {"tag": "Neural networks", "type": 1},
                {"tag": "ml"},
                {"tag": "on_rm"}
            ])
        );
    }

    #[test]
    fn test_collection_parent_false_or_key() {
        let root: ApiCollection =
            serde_json::from_str(r#"{"key":"C1","data":{"name":"Papers","parentCollection":false}}"#)
                .unwrap();
        assert!(root.data.parent_collection.as_str().is_none());

        let child: ApiCollection =
            serde_json::from_str(r#"{"key":"C2","data":{"name":"ML","parentCollection":"C1"}}"#)
                .unwrap();
        assert_eq!(child.data.parent_collection.as_str(), Some("C1"));
    }

    #[test]
    fn test_library_prefix() {
        let config = ZoteroConfig {
            library_id: "99".to_string(),
            library_type: "group".to_string(),
            api_key: "k".to_string(),
            storage_dir: "/tmp".into(),
            attachment_dir: None,
            send_tag: "to_rm".to_string(),
            replace_tag: None,
        };
        let client = ZoteroClient::new(&config)
            .unwrap()
            .with_base_url("http://localhost:8080/");
        assert_eq!(client.url("items/top"), "http://localhost:8080/groups/99/items/top");
    }
}
