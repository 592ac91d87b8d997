//! Notion record store client
//!
//! Talks to the private `api/v3` JSON endpoints used by the Notion web app.
//! One `fetch_snapshot` call loads the root page chunk, queries every
//! collection view found on it, then back-fills member blocks the queries
//! referenced but did not include.

use crate::config::ApiConfig;
use crate::id::{compact_id, id_to_uuid, parse_page_id};
use crate::page_ids::all_page_ids;
use crate::record_map::{record_value, Block, RecordMap};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: StatusCode },
    #[error("Authentication required for {0}")]
    AuthRequired(String),
    #[error("Rate limited by {0}")]
    RateLimited(String),
    #[error("Request to {0} timed out")]
    Timeout(String),
    #[error("Response too large: {size} bytes (max: {max} bytes)")]
    ContentTooLarge { size: usize, max: usize },
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid id: {0}")]
    InvalidId(String),
}

/// Source of raw workspace snapshots
pub trait RecordStore {
    /// Resolve a root id (page or database, any id form) into a snapshot
    fn fetch_snapshot(
        &self,
        root_id: &str,
    ) -> impl Future<Output = Result<RecordMap, StoreError>> + Send;

    /// Resolve user ids into user records, in request order. Unknown ids are skipped.
    fn fetch_users(
        &self,
        user_ids: &[String],
    ) -> impl Future<Output = Result<Vec<NotionUser>, StoreError>> + Send;
}

/// User record as returned for `notion_user` pointers
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotionUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

impl NotionUser {
    /// Display name, falling back to family + given name
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return Some(name.to_string());
        }
        let joined = format!(
            "{}{}",
            self.family_name.as_deref().unwrap_or_default(),
            self.given_name.as_deref().unwrap_or_default()
        );
        (!joined.is_empty()).then_some(joined)
    }
}

#[derive(Debug, Deserialize)]
struct RecordMapResponse {
    #[serde(rename = "recordMap", default)]
    record_map: RecordMap,
}

#[derive(Debug, Deserialize)]
struct QueryCollectionResponse {
    #[serde(default)]
    result: Value,
    #[serde(rename = "recordMap", default)]
    record_map: RecordMap,
}

#[derive(Debug, Deserialize)]
struct RecordValuesResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// HTTP client for the Notion `api/v3` endpoints
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: Client,
    base_url: String,
    config: ApiConfig,
}

impl NotionClient {
    pub fn new(config: ApiConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Load the first chunk of a page: the page block, its children and any
    /// collection metadata they reference
    pub async fn load_page_chunk(&self, page_id: &str) -> Result<RecordMap, StoreError> {
        let body = json!({
            "pageId": page_id,
            "limit": 100,
            "cursor": { "stack": [] },
            "chunkNumber": 0,
            "verticalColumns": false,
        });
        let response: RecordMapResponse = self.post("loadPageChunk", &body).await?;
        Ok(response.record_map)
    }

    /// Query one collection view. Returns the reducer results (member ids) and
    /// the records the store sent along with them.
    pub async fn query_collection(
        &self,
        collection_id: &str,
        view_id: &str,
    ) -> Result<(Value, RecordMap), StoreError> {
        let body = json!({
            "collection": { "id": collection_id },
            "collectionView": { "id": view_id },
            "loader": {
                "type": "reducer",
                "reducers": {
                    "collection_group_results": {
                        "type": "results",
                        "limit": self.config.query_limit,
                    }
                },
                "searchQuery": "",
                "userTimeZone": "UTC",
            },
        });
        let response: QueryCollectionResponse = self.post("queryCollection", &body).await?;
        let results = response
            .result
            .get("reducerResults")
            .cloned()
            .unwrap_or_else(|| response.result.clone());
        Ok((results, response.record_map))
    }

    /// Fetch blocks by id
    pub async fn sync_blocks(&self, block_ids: &[String]) -> Result<RecordMap, StoreError> {
        if block_ids.is_empty() {
            return Ok(RecordMap::default());
        }
        let requests: Vec<Value> = block_ids
            .iter()
            .map(|id| json!({ "pointer": { "table": "block", "id": id }, "version": -1 }))
            .collect();
        let response: RecordMapResponse = self
            .post("syncRecordValues", &json!({ "requests": requests }))
            .await?;
        Ok(response.record_map)
    }

    /// POST a JSON body and decode the JSON response, retrying transient failures.
    /// Does NOT retry on auth errors (401/403), 404 or rate limiting.
    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T, StoreError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(self.config.retry_delay_ms, attempt)).await;
                tracing::debug!("Retrying {} (attempt {})", endpoint, attempt + 1);
            }

            let mut request = self
                .client
                .post(&url)
                .header(header::ACCEPT, "application/json")
                .json(body);
            if let Some(token) = self.config.auth_token.as_deref() {
                request = request.header(header::COOKIE, format!("token_v2={token}"));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_error = Some(StoreError::Timeout(endpoint.to_string()));
                    continue;
                }
                Err(e) if e.is_connect() || e.is_request() => {
                    last_error = Some(StoreError::Request(e));
                    continue;
                }
                Err(e) => return Err(StoreError::Request(e)),
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(StoreError::AuthRequired(endpoint.to_string()));
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(StoreError::RateLimited(endpoint.to_string()));
            }
            if status.is_server_error() {
                last_error = Some(StoreError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                });
                continue;
            }
            if !status.is_success() {
                return Err(StoreError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                });
            }

            let bytes = read_body_with_limit(response, self.config.max_response_bytes).await?;
            tracing::debug!("{} returned {} bytes", endpoint, bytes.len());
            return Ok(serde_json::from_slice(&bytes)?);
        }

        Err(last_error.unwrap_or_else(|| StoreError::Timeout(endpoint.to_string())))
    }
}

impl RecordStore for NotionClient {
    async fn fetch_snapshot(&self, root_id: &str) -> Result<RecordMap, StoreError> {
        let page_id =
            parse_page_id(root_id).ok_or_else(|| StoreError::InvalidId(root_id.to_string()))?;

        let mut snapshot = self.load_page_chunk(&compact_id(&page_id)).await?;

        // Every collection view block on the page, in response order
        let views: Vec<(String, String)> = snapshot
            .block
            .values()
            .filter_map(record_value)
            .filter_map(|value| Block::from_value(value).ok())
            .filter(Block::is_collection_view)
            .filter_map(|block| {
                let collection_id = block.collection_id?;
                Some(
                    block
                        .view_ids
                        .into_iter()
                        .map(move |view_id| (collection_id.clone(), view_id)),
                )
            })
            .flatten()
            .collect();

        for (collection_id, view_id) in views {
            let (results, records) = self.query_collection(&collection_id, &view_id).await?;
            snapshot.merge(records);
            snapshot.insert_query_result(&collection_id, &view_id, results);
        }

        let missing: Vec<String> = all_page_ids(&snapshot)
            .into_iter()
            .filter(|id| snapshot.block_value(id).is_none())
            .collect();
        if !missing.is_empty() {
            tracing::debug!("Fetching {} member blocks missing from the snapshot", missing.len());
            let records = self.sync_blocks(&missing).await?;
            snapshot.merge(records);
        }

        Ok(snapshot)
    }

    async fn fetch_users(&self, user_ids: &[String]) -> Result<Vec<NotionUser>, StoreError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let requests: Vec<Value> = user_ids
            .iter()
            .map(|id| json!({ "id": id, "table": "notion_user" }))
            .collect();
        let response: RecordValuesResponse = self
            .post("getRecordValues", &json!({ "requests": requests }))
            .await?;

        let users = response
            .results
            .iter()
            .filter_map(record_value)
            .filter_map(|value| match NotionUser::deserialize(value) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!("Skipping undecodable user record: {}", e);
                    None
                }
            })
            .map(|mut user| {
                user.id = id_to_uuid(&user.id);
                user
            })
            .collect();
        Ok(users)
    }
}

/// Linear back-off: `base_ms` times the attempt number, saturating
fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(u64::from(attempt)))
}

/// Read response body with streaming size limit.
///
/// Stops reading early if the content exceeds max_size.
async fn read_body_with_limit(
    response: reqwest::Response,
    max_size: usize,
) -> Result<Vec<u8>, StoreError> {
    if let Some(content_length) = response.content_length() {
        let content_length = usize::try_from(content_length).unwrap_or(usize::MAX);
        if content_length > max_size {
            return Err(StoreError::ContentTooLarge {
                size: content_length,
                max: max_size,
            });
        }
    }

    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > max_size {
            return Err(StoreError::ContentTooLarge {
                size: buffer.len() + chunk.len(),
                max: max_size,
            });
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer)
}
