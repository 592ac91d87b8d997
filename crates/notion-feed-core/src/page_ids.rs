//! Member page enumeration over collection query results

use crate::id::id_to_uuid;
use crate::record_map::RecordMap;
use serde_json::Value;
use std::collections::HashSet;

/// Every member page id of the first queried collection, across all of its
/// views, in response order and without duplicates.
pub fn all_page_ids(snapshot: &RecordMap) -> Vec<String> {
    let Some(Value::Object(views)) = snapshot.collection_query.values().next() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for result in views.values() {
        for id in view_block_ids(result) {
            if seen.insert(id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Member page ids of a single view of the first queried collection
pub fn page_ids_for_view(snapshot: &RecordMap, view_id: &str) -> Vec<String> {
    let Some(Value::Object(views)) = snapshot.collection_query.values().next() else {
        return Vec::new();
    };

    let view_id = id_to_uuid(view_id);
    views
        .iter()
        .find(|(id, _)| id_to_uuid(id) == view_id)
        .map(|(_, result)| {
            let mut seen = HashSet::new();
            view_block_ids(result)
                .filter(|id| seen.insert(*id))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Ids listed by one view result: flat `blockIds` first, then grouped results
fn view_block_ids(result: &Value) -> impl Iterator<Item = &str> {
    let flat = result.get("blockIds");
    let grouped = result
        .get("collection_group_results")
        .and_then(|group| group.get("blockIds"));

    [flat, grouped]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
}
