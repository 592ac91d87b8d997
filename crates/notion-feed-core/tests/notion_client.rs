//! Notion client integration tests
//!
//! Runs the HTTP client against a local axum server that mimics the
//! `api/v3` endpoints.

mod common;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use common::{PageFixture, COLLECTION_ID, ROOT_ID, ROOT_UUID, VIEW_ID};
use notion_feed_core::{
    ApiConfig, FeedConfig, NotionClient, PostFeed, PropertyValue, RecordStore, StoreError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const FIRST: &str = "b0000000-0000-4000-8000-000000000001";
const SECOND: &str = "b0000000-0000-4000-8000-000000000002";
const USER: &str = "c0000000-0000-4000-8000-0000000000aa";

#[derive(Default)]
struct MockNotion {
    calls: Mutex<Vec<(String, Value)>>,
    cookies: Mutex<Vec<String>>,
    /// Respond 500 to this many requests before answering normally
    fail_first: AtomicUsize,
    /// Answer every request with this status
    status: Option<StatusCode>,
}

impl MockNotion {
    fn endpoints(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    fn body_of(&self, endpoint: &str) -> Value {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|(name, _)| name == endpoint)
            .map(|(_, body)| body.clone())
            .unwrap_or_else(|| panic!("{endpoint} was never called"))
    }
}

fn first_page() -> Value {
    let mut record = PageFixture::new(FIRST, "Older post")
        .dated("2024-01-01")
        .to_record();
    record["value"]["properties"]["au7h"] = json!([["‣", [["u", USER]]]]);
    record
}

fn second_page() -> Value {
    PageFixture::new(SECOND, "Newer post")
        .dated("2024-05-01")
        .full_width(true)
        .to_record()
}

fn schema() -> Value {
    let mut schema = common::schema_json();
    schema["au7h"] = json!({ "name": "author", "type": "person" });
    schema
}

fn respond(endpoint: &str) -> Value {
    match endpoint {
        "loadPageChunk" => json!({
            "recordMap": {
                "block": {
                    ROOT_UUID: {
                        "role": "reader",
                        "value": {
                            "id": ROOT_UUID,
                            "type": "collection_view_page",
                            "collection_id": COLLECTION_ID,
                            "view_ids": [VIEW_ID]
                        }
                    }
                },
                "collection": {
                    COLLECTION_ID: {
                        "role": "reader",
                        "value": { "id": COLLECTION_ID, "schema": schema() }
                    }
                }
            },
            "cursor": { "stack": [] }
        }),
        "queryCollection" => json!({
            "result": {
                "type": "reducer",
                "reducerResults": {
                    "collection_group_results": {
                        "type": "results",
                        "blockIds": [FIRST, SECOND],
                        "hasMore": false
                    }
                }
            },
            "recordMap": { "block": { FIRST: first_page() } }
        }),
        "syncRecordValues" => json!({
            "recordMap": { "block": { SECOND: second_page() } }
        }),
        "getRecordValues" => json!({
            "results": [{
                "role": "reader",
                "value": {
                    "id": USER,
                    "given_name": "Ada",
                    "family_name": "Lovelace",
                    "profile_photo": "https://example.com/ada.png"
                }
            }]
        }),
        _ => json!({}),
    }
}

async fn api(
    State(mock): State<Arc<MockNotion>>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    mock.calls
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push((endpoint.clone(), body));
    if let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        mock.cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(cookie.to_string());
    }

    if let Some(status) = mock.status {
        return (status, Json(json!({ "errorId": "mock" })));
    }
    let failing = mock
        .fail_first
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "try again" })),
        );
    }
    (StatusCode::OK, Json(respond(&endpoint)))
}

/// Serve the mock on an ephemeral port and return its `api/v3` base URL
async fn spawn(mock: Arc<MockNotion>) -> String {
    let app = Router::new()
        .route("/api/v3/:endpoint", post(api))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind mock server: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("mock server address: {err}"));
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}/api/v3")
}

fn api_config(base_url: String) -> ApiConfig {
    ApiConfig {
        base_url,
        timeout_secs: 5,
        max_retries: 2,
        retry_delay_ms: 1,
        ..ApiConfig::default()
    }
}

#[tokio::test]
async fn test_posts_end_to_end() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion::default());
    let mut config = FeedConfig::for_database(ROOT_ID);
    config.api = api_config(spawn(mock.clone()).await);

    let posts = PostFeed::notion(config)?.posts().await;

    assert_eq!(
        mock.endpoints(),
        vec![
            "loadPageChunk",
            "queryCollection",
            "syncRecordValues",
            "getRecordValues"
        ]
    );
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].id, SECOND);
    assert!(posts[0].full_width);
    assert_eq!(posts[1].id, FIRST);
    assert_eq!(posts[1].properties["title"].as_text(), Some("Older post"));

    let PropertyValue::People(authors) = &posts[1].properties["author"] else {
        panic!("author should be people: {:?}", posts[1].properties["author"]);
    };
    assert_eq!(authors[0].id, USER);
    assert_eq!(authors[0].name.as_deref(), Some("LovelaceAda"));
    Ok(())
}

#[tokio::test]
async fn test_request_bodies() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion::default());
    let client = NotionClient::new(api_config(spawn(mock.clone()).await))?;
    client.fetch_snapshot(ROOT_UUID).await?;

    let chunk = mock.body_of("loadPageChunk");
    assert_eq!(chunk["pageId"], ROOT_ID);
    assert_eq!(chunk["limit"], 100);
    assert_eq!(chunk["chunkNumber"], 0);

    let query = mock.body_of("queryCollection");
    assert_eq!(query["collection"]["id"], COLLECTION_ID);
    assert_eq!(query["collectionView"]["id"], VIEW_ID);
    assert_eq!(
        query["loader"]["reducers"]["collection_group_results"]["limit"],
        999
    );

    let sync = mock.body_of("syncRecordValues");
    assert_eq!(sync["requests"].as_array().map(Vec::len), Some(1));
    assert_eq!(sync["requests"][0]["pointer"]["id"], SECOND);
    assert_eq!(sync["requests"][0]["pointer"]["table"], "block");
    Ok(())
}

#[tokio::test]
async fn test_snapshot_contains_queried_and_synced_blocks() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion::default());
    let client = NotionClient::new(api_config(spawn(mock).await))?;
    let snapshot = client.fetch_snapshot(ROOT_ID).await?;

    assert!(snapshot.block_value(FIRST).is_some());
    assert!(snapshot.block_value(SECOND).is_some());
    assert!(snapshot.first_schema().is_some());
    assert_eq!(
        snapshot.collection_query[COLLECTION_ID][VIEW_ID]["collection_group_results"]["blockIds"],
        json!([FIRST, SECOND])
    );
    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_retried() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion {
        fail_first: AtomicUsize::new(2),
        ..MockNotion::default()
    });
    let client = NotionClient::new(api_config(spawn(mock.clone()).await))?;

    client.load_page_chunk(ROOT_ID).await?;
    assert_eq!(mock.endpoints().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion {
        fail_first: AtomicUsize::new(5),
        ..MockNotion::default()
    });
    let mut config = api_config(spawn(mock.clone()).await);
    config.max_retries = 1;
    let client = NotionClient::new(config)?;

    let result = client.load_page_chunk(ROOT_ID).await;
    assert!(matches!(
        result,
        Err(StoreError::Status { status, .. }) if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
    ));
    assert_eq!(mock.endpoints().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion {
        status: Some(StatusCode::UNAUTHORIZED),
        ..MockNotion::default()
    });
    let client = NotionClient::new(api_config(spawn(mock.clone()).await))?;

    let result = client.fetch_snapshot(ROOT_ID).await;
    assert!(matches!(result, Err(StoreError::AuthRequired(_))));
    assert_eq!(mock.endpoints(), vec!["loadPageChunk"]);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_is_not_retried() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion {
        status: Some(StatusCode::TOO_MANY_REQUESTS),
        ..MockNotion::default()
    });
    let client = NotionClient::new(api_config(spawn(mock.clone()).await))?;

    let result = client.load_page_chunk(ROOT_ID).await;
    assert!(matches!(result, Err(StoreError::RateLimited(_))));
    assert_eq!(mock.endpoints().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_auth_token_sent_as_cookie() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion::default());
    let mut config = api_config(spawn(mock.clone()).await);
    config.auth_token = Some("secret".into());
    let client = NotionClient::new(config)?;

    client.load_page_chunk(ROOT_ID).await?;
    let cookies = mock
        .cookies
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    assert_eq!(cookies, vec!["token_v2=secret".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_oversized_response_is_rejected() -> Result<(), StoreError> {
    let mock = Arc::new(MockNotion::default());
    let mut config = api_config(spawn(mock).await);
    config.max_response_bytes = 16;
    let client = NotionClient::new(config)?;

    let result = client.load_page_chunk(ROOT_ID).await;
    assert!(matches!(result, Err(StoreError::ContentTooLarge { max: 16, .. })));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_store_yields_no_posts() {
    let mut config = FeedConfig::for_database(ROOT_ID);
    config.api = ApiConfig {
        max_retries: 0,
        ..api_config("http://127.0.0.1:9/api/v3".into())
    };
    let feed = PostFeed::notion(config).unwrap_or_else(|err| panic!("client should build: {err}"));

    assert!(feed.posts().await.is_empty());
}
