//! Azure AI Search index backend.
//!
//! Talks to the Azure AI Search REST API with an admin `api-key`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | read schema | `GET /indexes/{name}` |
//! | create | `PUT /indexes/{name}` |
//! | upsert | `POST /indexes/{name}/docs/index` with `@search.action = upload` |
//! | search | `POST /indexes/{name}/docs/search` with a vector query |
//!
//! The `upload` action replaces any document with the same key, which gives
//! the id-keyed overwrite the pipeline relies on. A 207 response carries
//! per-document status; each rejected key is reported individually.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{IndexConfig, SearchCredentials};
use crate::error::{PipelineError, Service};
use crate::models::{IndexRecord, SearchHit};

use super::{IndexBackend, IndexSchema, UpsertOutcome};

const VECTOR_FIELD: &str = "content_vector";
const HNSW_ALGORITHM: &str = "hnsw-default";

pub struct AzureSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct IndexDefinition {
    #[serde(default)]
    fields: Vec<FieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct FieldDefinition {
    name: String,
    #[serde(default)]
    dimensions: Option<usize>,
}

/// Document body for `docs/index`.
#[derive(Debug, Serialize)]
struct IndexAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    id: &'a str,
    content: &'a str,
    content_vector: &'a [f32],
    metadata: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexingResponse {
    #[serde(default)]
    value: Vec<IndexingResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    status_code: u16,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchDocument {
    #[serde(rename = "@search.score")]
    score: f64,
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: String,
}

impl AzureSearchIndex {
    pub fn new(config: &IndexConfig, credentials: SearchCredentials) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: credentials.endpoint.trim_end_matches('/').to_string(),
            api_key: credentials.admin_key,
            api_version: config.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Send a JSON request; returns the status and the body text.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), PipelineError> {
        let mut req = self
            .client
            .request(method, self.url(path))
            .header("api-key", &self.api_key)
            .query(&[("api-version", self.api_version.as_str())]);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Index, &e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Index, &e))?;
        Ok((status, text))
    }
}

fn index_path(name: &str) -> String {
    format!("/indexes/{}", name)
}

fn invalid_response(what: &str, err: serde_json::Error) -> PipelineError {
    PipelineError::IndexService {
        message: format!("invalid {} response: {}", what, err),
        retryable: false,
    }
}

/// JSON definition of the diary index.
pub fn index_definition(schema: &IndexSchema) -> Value {
    json!({
        "name": schema.name,
        "fields": [
            {
                "name": "id",
                "type": "Edm.String",
                "key": true,
                "filterable": true
            },
            {
                "name": "content",
                "type": "Edm.String",
                "searchable": true,
                "analyzer": schema.analyzer
            },
            {
                "name": VECTOR_FIELD,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": schema.dimensions,
                "vectorSearchProfile": schema.vector_profile
            },
            {
                "name": "metadata",
                "type": "Edm.String",
                "searchable": true,
                "analyzer": schema.analyzer
            }
        ],
        "vectorSearch": {
            "algorithms": [
                { "name": HNSW_ALGORITHM, "kind": "hnsw" }
            ],
            "profiles": [
                { "name": schema.vector_profile, "algorithm": HNSW_ALGORITHM }
            ]
        }
    })
}

fn outcome_from_result(result: IndexingResult) -> UpsertOutcome {
    let outcome = if result.status {
        Ok(())
    } else {
        let message = format!(
            "document '{}' rejected (HTTP {}): {}",
            result.key,
            result.status_code,
            result.error_message.unwrap_or_default()
        );
        Err(match StatusCode::from_u16(result.status_code) {
            Ok(code) if code == StatusCode::TOO_MANY_REQUESTS || code.is_server_error() => {
                PipelineError::IndexService {
                    message,
                    retryable: true,
                }
            }
            _ => PipelineError::IndexService {
                message,
                retryable: false,
            },
        })
    };
    UpsertOutcome {
        id: result.key,
        result: outcome,
    }
}

#[async_trait]
impl IndexBackend for AzureSearchIndex {
    async fn vector_dimensions(&self, name: &str) -> Result<Option<usize>, PipelineError> {
        let (status, body) = self.send(Method::GET, &index_path(name), None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PipelineError::from_status(Service::Index, status, &body));
        }
        let definition: IndexDefinition =
            serde_json::from_str(&body).map_err(|e| invalid_response("index definition", e))?;
        definition
            .fields
            .into_iter()
            .find(|f| f.name == VECTOR_FIELD)
            .and_then(|f| f.dimensions)
            .map(Some)
            .ok_or_else(|| PipelineError::IndexService {
                message: format!("index '{}' has no '{}' vector field", name, VECTOR_FIELD),
                retryable: false,
            })
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), PipelineError> {
        let definition = index_definition(schema);
        let (status, body) = self
            .send(Method::PUT, &index_path(&schema.name), Some(&definition))
            .await?;
        if !status.is_success() {
            return Err(PipelineError::from_status(Service::Index, status, &body));
        }
        tracing::info!(index = %schema.name, dimensions = schema.dimensions, "created search index");
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<Vec<UpsertOutcome>, PipelineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let actions: Vec<IndexAction<'_>> = records
            .iter()
            .map(|r| IndexAction {
                action: "upload",
                id: &r.id,
                content: &r.content,
                content_vector: &r.content_vector,
                metadata: &r.metadata,
            })
            .collect();
        let body = json!({ "value": actions });

        let path = format!("{}/docs/index", index_path(index));
        let (status, text) = self.send(Method::POST, &path, Some(&body)).await?;
        // 207 Multi-Status: some documents failed
        if !status.is_success() {
            return Err(PipelineError::from_status(Service::Index, status, &text));
        }
        let parsed: IndexingResponse =
            serde_json::from_str(&text).map_err(|e| invalid_response("indexing", e))?;
        Ok(parsed.value.into_iter().map(outcome_from_result).collect())
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let body = json!({
            "select": "id,content,metadata",
            "top": k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": vector,
                "fields": VECTOR_FIELD,
                "k": k
            }]
        });
        let path = format!("{}/docs/search", index_path(index));
        let (status, text) = self.send(Method::POST, &path, Some(&body)).await?;
        if !status.is_success() {
            return Err(PipelineError::from_status(Service::Index, status, &text));
        }
        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| invalid_response("search", e))?;
        Ok(parsed
            .value
            .into_iter()
            .map(|doc| SearchHit {
                id: doc.id,
                content: doc.content,
                metadata: doc.metadata,
                score: doc.score,
            })
            .collect())
    }
}
