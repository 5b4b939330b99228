use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresRequest {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl PostgresRequest {
    pub fn schema_or_default(&self) -> &str {
        match self.schema.as_deref() {
            Some(schema) if !schema.is_empty() => schema,
            _ => "public",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPostgresResponse {
    pub schemas: Vec<String>,
    /// Schema-qualified tables and views, presented as "files".
    pub files: Vec<String>,
    pub total_objects: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: String,
    pub default: Option<String>,
    pub max_length: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSample {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Option<String>>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablePreviewResponse {
    pub schema: TableSchema,
    pub sample: TableSample,
}
