//! Raw snapshot of a Notion workspace as returned by the `api/v3` endpoints
//!
//! Tables are kept as ordered JSON maps so that iteration follows the order the
//! store returned them in. Individual records are decoded lazily: a corrupt
//! block only fails the code path that actually reads it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Block type tags that describe a viewable collection
pub const COLLECTION_VIEW_TYPES: [&str; 2] = ["collection_view_page", "collection_view"];

/// Identifier -> record envelope (`{ "value": .., "role": .. }`)
pub type RecordTable = Map<String, Value>;

/// Column key -> column definition
pub type Schema = HashMap<String, ColumnSchema>;

/// In-memory snapshot of blocks and collection metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMap {
    #[serde(default)]
    pub block: RecordTable,
    #[serde(default)]
    pub collection: RecordTable,
    #[serde(default)]
    pub collection_view: RecordTable,
    /// collection id -> view id -> query result
    #[serde(default)]
    pub collection_query: Map<String, Value>,
    #[serde(default)]
    pub notion_user: RecordTable,
}

impl RecordMap {
    /// Raw value of the block with the given id, unwrapped from its envelope
    pub fn block_value(&self, id: &str) -> Option<&Value> {
        self.block.get(id).and_then(record_value)
    }

    /// Decode the block with the given id
    pub fn block(&self, id: &str) -> Option<Result<Block, serde_json::Error>> {
        self.block_value(id).map(Block::from_value)
    }

    /// Schema of the first collection in the snapshot, if it declares one.
    ///
    /// Columns are decoded one by one; an undecodable column is dropped with a
    /// warning and the rest of the schema is kept.
    pub fn first_schema(&self) -> Option<Schema> {
        let collection = self.collection.values().next().and_then(record_value)?;
        let Some(Value::Object(columns)) = collection.get("schema") else {
            return None;
        };

        let schema = columns
            .iter()
            .filter_map(|(key, column)| match ColumnSchema::deserialize(column) {
                Ok(column) => Some((key.clone(), column)),
                Err(e) => {
                    tracing::warn!("Skipping schema column {}: {}", key, e);
                    None
                }
            })
            .collect();
        Some(schema)
    }

    /// Merge another snapshot into this one. Records in `other` win.
    pub fn merge(&mut self, other: RecordMap) {
        self.block.extend(other.block);
        self.collection.extend(other.collection);
        self.collection_view.extend(other.collection_view);
        self.notion_user.extend(other.notion_user);
        for (collection_id, views) in other.collection_query {
            let Value::Object(views) = views else {
                continue;
            };
            for (view_id, result) in views {
                self.insert_query_result(&collection_id, &view_id, result);
            }
        }
    }

    /// Record a collection query result for one view
    pub fn insert_query_result(&mut self, collection_id: &str, view_id: &str, result: Value) {
        let entry = self
            .collection_query
            .entry(collection_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(views) = entry {
            views.insert(view_id.to_string(), result);
        }
    }
}

/// Unwrap a record envelope.
///
/// Newer responses nest the record one level deeper
/// (`{ "value": { "value": {..}, "role": .. } }`); both shapes are accepted.
pub fn record_value(record: &Value) -> Option<&Value> {
    let value = record.get("value")?;
    match value.get("value") {
        Some(inner) if inner.is_object() && value.get("role").is_some() => Some(inner),
        _ => Some(value),
    }
}

/// A single block. Only the fields the feed reads are decoded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub block_type: String,
    /// Epoch milliseconds, occasionally an ISO-8601 string
    #[serde(default)]
    pub created_time: Option<Value>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub format: Option<BlockFormat>,
    #[serde(default)]
    pub parent_table: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub view_ids: Vec<String>,
}

impl Block {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Block::deserialize(value)
    }

    pub fn is_collection_view(&self) -> bool {
        COLLECTION_VIEW_TYPES.contains(&self.block_type.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockFormat {
    #[serde(default)]
    pub page_full_width: Option<bool>,
}

/// Column definition in a collection schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Column types the extractor distinguishes. Everything else reads as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Title,
    Text,
    Number,
    Checkbox,
    Date,
    Select,
    MultiSelect,
    Person,
    File,
    Url,
    Email,
    PhoneNumber,
    #[serde(other)]
    Other,
}
