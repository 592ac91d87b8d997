//! Schema-driven property extraction
//!
//! Notion stores page properties as "decorated text": an array of
//! `[text, decorations?]` segments, where a decoration such as
//! `["d", { "start_date": .. }]` or `["u", "<user id>"]` carries typed data.
//! Extraction flattens those into a column-name keyed bag of tagged values.

use crate::client::{RecordStore, StoreError};
use crate::id::id_to_uuid;
use crate::record_map::{record_value, Block, ColumnType, RecordTable, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;
use url::Url;

/// Column name -> value
pub type PropertyBag = BTreeMap<String, PropertyValue>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Malformed block {id}: {source}")]
    MalformedBlock {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed value in column '{column}': {reason}")]
    MalformedProperty { column: String, reason: String },
    #[error("User lookup failed: {0}")]
    UserLookup(#[from] StoreError),
}

/// A single extracted column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Checkbox(bool),
    Date(DateRange),
    Options(Vec<String>),
    People(Vec<Person>),
    Empty,
}

impl PropertyValue {
    pub fn as_date(&self) -> Option<&DateRange> {
        match self {
            PropertyValue::Date(range) => Some(range),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Date decoration payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: String,
    pub name: Option<String>,
    pub profile_photo: Option<String>,
}

/// Maps one member block into a property bag.
///
/// `Ok(None)` means "not a post" (missing block, no properties); errors are
/// per item and never abort the surrounding fetch.
pub trait PropertyExtractor {
    fn extract(
        &self,
        id: &str,
        blocks: &RecordTable,
        schema: &Schema,
    ) -> impl Future<Output = Result<Option<PropertyBag>, ExtractError>> + Send;
}

/// Default extractor. Person columns are resolved through the record store.
#[derive(Debug, Clone)]
pub struct SchemaProperties<S> {
    store: S,
}

impl<S> SchemaProperties<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: RecordStore + Sync> PropertyExtractor for SchemaProperties<S> {
    async fn extract(
        &self,
        id: &str,
        blocks: &RecordTable,
        schema: &Schema,
    ) -> Result<Option<PropertyBag>, ExtractError> {
        let Some(value) = blocks.get(id).and_then(record_value) else {
            return Ok(None);
        };
        let block = Block::from_value(value).map_err(|source| ExtractError::MalformedBlock {
            id: id.to_string(),
            source,
        })?;
        let raw_properties = match block.properties {
            Some(ref properties) if !properties.is_empty() => properties,
            _ => return Ok(None),
        };

        let mut bag = PropertyBag::new();
        for (key, raw) in raw_properties {
            let Some(column) = schema.get(key) else {
                continue;
            };
            let segments = raw.as_array().ok_or_else(|| ExtractError::MalformedProperty {
                column: column.name.clone(),
                reason: format!("expected an array, found {}", json_kind(raw)),
            })?;

            match column.column_type {
                ColumnType::Date => {
                    let range = date_value(raw)
                        .and_then(|d| DateRange::deserialize(d).ok())
                        .map_or(PropertyValue::Empty, PropertyValue::Date);
                    bag.insert(column.name.clone(), range);
                }
                ColumnType::Select | ColumnType::MultiSelect => {
                    let text = text_content(segments);
                    if !text.is_empty() {
                        let options = text.split(',').map(str::to_string).collect();
                        bag.insert(column.name.clone(), PropertyValue::Options(options));
                    }
                }
                ColumnType::Person => {
                    let people = self.people(raw).await?;
                    bag.insert(column.name.clone(), PropertyValue::People(people));
                }
                ColumnType::File => {
                    let url = first_file_url(segments)
                        .and_then(|url| map_image_url(url, &block))
                        .map_or(PropertyValue::Empty, PropertyValue::Text);
                    bag.insert(column.name.clone(), url);
                }
                ColumnType::Number => {
                    let text = text_content(segments);
                    let value = text
                        .trim()
                        .parse::<f64>()
                        .map_or(PropertyValue::Text(text), PropertyValue::Number);
                    bag.insert(column.name.clone(), value);
                }
                ColumnType::Checkbox => {
                    let checked = text_content(segments) == "Yes";
                    bag.insert(column.name.clone(), PropertyValue::Checkbox(checked));
                }
                _ => {
                    bag.insert(column.name.clone(), PropertyValue::Text(text_content(segments)));
                }
            }
        }

        Ok(Some(bag))
    }
}

impl<S: RecordStore + Sync> SchemaProperties<S> {
    async fn people(&self, raw: &Value) -> Result<Vec<Person>, ExtractError> {
        let mut user_ids = Vec::new();
        collect_user_ids(raw, &mut user_ids);
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = self.store.fetch_users(&user_ids).await?;
        let people = user_ids
            .iter()
            .map(|id| {
                let canonical = id_to_uuid(id);
                match users.iter().find(|user| user.id == canonical) {
                    Some(user) => Person {
                        id: canonical,
                        name: user.display_name(),
                        profile_photo: user.profile_photo.clone(),
                    },
                    None => Person {
                        id: canonical,
                        name: None,
                        profile_photo: None,
                    },
                }
            })
            .collect();
        Ok(people)
    }
}

/// Concatenate the text of every segment, ignoring decorations
pub fn text_content(segments: &[Value]) -> String {
    segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect()
}

/// First `["d", {..}]` decoration found anywhere in the value
pub fn date_value(value: &Value) -> Option<&Value> {
    let items = value.as_array()?;
    if items.first().and_then(Value::as_str) == Some("d") {
        return items.get(1);
    }
    items.iter().find_map(date_value)
}

/// Every `["u", "<id>"]` decoration, in order, without duplicates
fn collect_user_ids(value: &Value, out: &mut Vec<String>) {
    let Some(items) = value.as_array() else {
        return;
    };
    if let (Some("u"), Some(id)) = (
        items.first().and_then(Value::as_str),
        items.get(1).and_then(Value::as_str),
    ) {
        if !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
        return;
    }
    for item in items {
        collect_user_ids(item, out);
    }
}

/// File columns store `[[name, [["a", url]]]]`
fn first_file_url(segments: &[Value]) -> Option<&str> {
    segments
        .first()?
        .get(1)?
        .get(0)?
        .get(1)?
        .as_str()
        .filter(|url| !url.is_empty())
}

/// Route a stored file URL through the notion.so image proxy so it can be
/// displayed without a signed S3 link. Returns `None` if the result is not a
/// valid URL.
pub fn map_image_url(url: &str, block: &Block) -> Option<String> {
    if url.starts_with("data:") || url.starts_with("https://images.unsplash.com") {
        return Some(url.to_string());
    }

    // Already-signed S3 links are used as-is
    if let Ok(parsed) = Url::parse(url) {
        let is_s3 = parsed.path().starts_with("/secure.notion-static.com")
            && parsed.host_str().is_some_and(|h| h.ends_with(".amazonaws.com"));
        if is_s3 {
            let keys: Vec<_> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
            let signed = ["X-Amz-Credential", "X-Amz-Signature", "X-Amz-Algorithm"]
                .iter()
                .all(|needed| keys.iter().any(|k| k == needed));
            if signed {
                return Some(url.to_string());
            }
        }
    }

    let proxied = if url.starts_with("/image") {
        format!("https://www.notion.so{url}")
    } else {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        format!("https://www.notion.so/image/{encoded}")
    };

    let mut proxied = Url::parse(&proxied).ok()?;
    let table = match block.parent_table.as_deref() {
        None | Some("space" | "collection" | "team") => "block",
        Some(other) => other,
    };
    let kept: Vec<(String, String)> = proxied
        .query_pairs()
        .filter(|(k, _)| !matches!(k.as_ref(), "table" | "id" | "cache"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    proxied
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("table", table)
        .append_pair("id", &block.id)
        .append_pair("cache", "v2");

    Some(proxied.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
