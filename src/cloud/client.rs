use crate::cloud::model::TypedValue;
use crate::errors::{DaemonError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// A document returned from the store: its resource name and decoded fields.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub fields: HashMap<String, TypedValue>,
}

/// Thin REST client over the Firestore `documents` API. Only the logical
/// operations the cloud poller needs are exposed: list queued jobs under a
/// collection, fetch one document, and patch specific fields.
pub struct FirestoreClient {
    http: reqwest::Client,
    project_id: String,
}

impl FirestoreClient {
    pub fn new(project_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, project_id }
    }

    fn documents_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            BASE_URL, self.project_id, path
        )
    }

    /// List documents with `status == "queued"` under `collection_path`, up
    /// to `limit` results. A 404 (missing collection) yields an empty list,
    /// not an error.
    pub async fn list_queued(&self, collection_path: &str, limit: u32) -> Result<Vec<Document>> {
        let (parent, collection_id) = split_collection_path(collection_path);
        let url = format!(
            "{}/projects/{}/databases/(default)/documents/{}:runQuery",
            BASE_URL, self.project_id, parent
        );

        let body = serde_json::json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection_id }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "status" },
                        "op": "EQUAL",
                        "value": { "stringValue": "queued" }
                    }
                },
                "limit": limit
            }
        });

        let response = self.http.post(&url).json(&body).send().await.map_err(to_daemon_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(DaemonError::Other(anyhow::anyhow!(
                "listQueued failed with status {}",
                response.status()
            )));
        }

        let results: Vec<Value> = response.json().await.map_err(to_daemon_error)?;
        let mut documents = Vec::new();
        for entry in results {
            let Some(doc) = entry.get("document") else {
                continue; // empty batch markers in runQuery streaming responses
            };
            if let Some(parsed) = parse_document(doc) {
                documents.push(parsed);
            }
        }

        debug!(count = documents.len(), "listed queued jobs");
        Ok(documents)
    }

    /// Fetch one document by its path (relative to `documents/`).
    pub async fn get(&self, doc_path: &str) -> Result<Option<Document>> {
        let url = self.documents_url(doc_path);
        let response = self.http.get(&url).send().await.map_err(to_daemon_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DaemonError::Other(anyhow::anyhow!(
                "get failed with status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(to_daemon_error)?;
        Ok(parse_document(&body))
    }

    /// Patch specific fields of a document, naming only the changed fields
    /// in the update mask.
    pub async fn patch(
        &self,
        doc_path: &str,
        field_mask: &[&str],
        fields: HashMap<String, TypedValue>,
    ) -> Result<()> {
        let mut url = self.documents_url(doc_path);
        url.push('?');
        for field in field_mask {
            url.push_str("updateMask.fieldPaths=");
            url.push_str(field);
            url.push('&');
        }

        let wire_fields: serde_json::Map<String, Value> =
            fields.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect();
        let body = serde_json::json!({ "fields": wire_fields });

        let response = self.http.patch(&url).json(&body).send().await.map_err(to_daemon_error)?;
        if !response.status().is_success() {
            return Err(DaemonError::Other(anyhow::anyhow!(
                "patch failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn split_collection_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, collection_id)) => (parent.to_string(), collection_id.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn parse_document(value: &Value) -> Option<Document> {
    let name = value.get("name")?.as_str()?.to_string();
    let fields_value = value.get("fields")?.as_object()?;
    let mut fields = HashMap::new();
    for (key, v) in fields_value {
        if let Some(typed) = TypedValue::from_wire(v) {
            fields.insert(key.clone(), typed);
        }
    }
    Some(Document { name, fields })
}

fn to_daemon_error(e: reqwest::Error) -> DaemonError {
    DaemonError::Other(anyhow::anyhow!("request error: {}", e))
}
