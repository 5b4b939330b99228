use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Request {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub region: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl S3Request {
    pub fn prefix(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub file_sizes: HashMap<String, i64>,
    pub folder_file_counts: HashMap<String, usize>,
    pub folder_count_capped: HashMap<String, bool>,
    pub recursive_file_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllFilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub size: i64,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// Per-key metadata lookup result. A failed key serializes as the bare
/// string `"Error: <text>"`, matching the wire contract, while the rest of
/// the keys still carry their metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetadataEntry {
    Found(ObjectMetadata),
    Failed(String),
}
