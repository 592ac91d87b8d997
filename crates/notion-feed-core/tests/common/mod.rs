//! Common test utilities for notion-feed integration tests
//!
//! Builds record map fixtures shaped like `loadPageChunk` + `queryCollection`
//! responses and provides an in-memory record store.

use notion_feed_core::{
    ExtractError, FeedConfig, NotionUser, PropertyBag, PropertyExtractor, RecordMap, RecordStore,
    RecordTable, Schema, StoreError,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ROOT_ID: &str = "0123456789abcdef0123456789abcdef";
pub const ROOT_UUID: &str = "01234567-89ab-cdef-0123-456789abcdef";
#[allow(dead_code)]
pub const COLLECTION_ID: &str = "c0c0c0c0-0000-4000-8000-000000000001";
#[allow(dead_code)]
pub const VIEW_ID: &str = "e0e0e0e0-0000-4000-8000-000000000001";

/// One member page fixture
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct PageFixture {
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub created_time: Option<i64>,
    pub full_width: Option<bool>,
}

#[allow(dead_code)]
impl PageFixture {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            date: None,
            created_time: Some(1_700_000_000_000),
            full_width: None,
        }
    }

    pub fn dated(mut self, start_date: &str) -> Self {
        self.date = Some(start_date.to_string());
        self
    }

    pub fn created_at(mut self, millis: Option<i64>) -> Self {
        self.created_time = millis;
        self
    }

    pub fn full_width(mut self, flag: bool) -> Self {
        self.full_width = Some(flag);
        self
    }

    pub fn to_record(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("title".into(), json!([[self.title]]));
        if let Some(date) = &self.date {
            properties.insert(
                "d8Kx".into(),
                json!([["‣", [["d", { "type": "date", "start_date": date }]]]]),
            );
        }

        let mut value = json!({
            "id": self.id,
            "type": "page",
            "parent_table": "collection",
            "parent_id": COLLECTION_ID,
            "properties": properties,
        });
        if let Some(created) = self.created_time {
            value["created_time"] = json!(created);
        }
        if let Some(flag) = self.full_width {
            value["format"] = json!({ "page_full_width": flag });
        }
        json!({ "role": "reader", "value": value })
    }
}

#[allow(dead_code)]
pub fn schema_json() -> Value {
    json!({
        "title": { "name": "title", "type": "title" },
        "d8Kx": { "name": "date", "type": "date" },
        "tg1s": { "name": "tags", "type": "multi_select" }
    })
}

#[allow(dead_code)]
pub fn schema() -> Schema {
    serde_json::from_value(schema_json())
        .unwrap_or_else(|err| panic!("schema fixture should decode: {err}"))
}

/// Snapshot rooted at `ROOT_UUID` with the given root type, schema and pages
#[allow(dead_code)]
pub fn snapshot(root_type: &str, schema: Option<Value>, pages: &[PageFixture]) -> RecordMap {
    let mut blocks = Map::new();
    blocks.insert(
        ROOT_UUID.into(),
        json!({
            "role": "reader",
            "value": {
                "id": ROOT_UUID,
                "type": root_type,
                "collection_id": COLLECTION_ID,
                "view_ids": [VIEW_ID],
            }
        }),
    );
    for page in pages {
        blocks.insert(page.id.clone(), page.to_record());
    }

    let mut collection = json!({ "id": COLLECTION_ID, "name": [["Posts"]] });
    if let Some(schema) = schema {
        collection["schema"] = schema;
    }

    let ids: Vec<&str> = pages.iter().map(|p| p.id.as_str()).collect();
    serde_json::from_value(json!({
        "block": blocks,
        "collection": { COLLECTION_ID: { "role": "reader", "value": collection } },
        "collection_query": {
            COLLECTION_ID: {
                VIEW_ID: {
                    "collection_group_results": { "type": "results", "blockIds": ids }
                }
            }
        }
    }))
    .unwrap_or_else(|err| panic!("snapshot fixture should decode: {err}"))
}

/// The usual happy-path snapshot
#[allow(dead_code)]
pub fn blog_snapshot(pages: &[PageFixture]) -> RecordMap {
    snapshot("collection_view_page", Some(schema_json()), pages)
}

#[allow(dead_code)]
pub fn config() -> FeedConfig {
    FeedConfig::for_database(ROOT_ID)
}

/// In-memory record store
#[allow(dead_code)]
#[derive(Clone)]
pub struct FakeStore {
    snapshot: Option<RecordMap>,
    pub requested: Arc<Mutex<Vec<String>>>,
    pub user_calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeStore {
    pub fn with_snapshot(snapshot: RecordMap) -> Self {
        Self {
            snapshot: Some(snapshot),
            requested: Arc::default(),
            user_calls: Arc::default(),
        }
    }

    /// Store whose every fetch fails like a dropped connection
    pub fn unreachable() -> Self {
        Self {
            snapshot: None,
            requested: Arc::default(),
            user_calls: Arc::default(),
        }
    }

    pub fn requested_ids(&self) -> Vec<String> {
        self.requested
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl RecordStore for FakeStore {
    async fn fetch_snapshot(&self, root_id: &str) -> Result<RecordMap, StoreError> {
        self.requested
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(root_id.to_string());
        self.snapshot
            .clone()
            .ok_or_else(|| StoreError::Timeout("loadPageChunk".into()))
    }

    async fn fetch_users(&self, _user_ids: &[String]) -> Result<Vec<NotionUser>, StoreError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Extractor that fails for one id and defers to `inner` for the rest
#[allow(dead_code)]
pub struct FailOn<X> {
    pub inner: X,
    pub id: String,
}

impl<X: PropertyExtractor + Sync> PropertyExtractor for FailOn<X> {
    async fn extract(
        &self,
        id: &str,
        blocks: &RecordTable,
        schema: &Schema,
    ) -> Result<Option<PropertyBag>, ExtractError> {
        if id == self.id {
            return Err(ExtractError::MalformedProperty {
                column: "title".into(),
                reason: "corrupt fixture".into(),
            });
        }
        self.inner.extract(id, blocks, schema).await
    }
}
