//! Post collection normalizer
//!
//! Fetches the configured database, validates that it is a collection view
//! with a schema, extracts every member page in isolation and returns the
//! posts newest first. `PostFeed::posts` never fails: a broken fetch yields an
//! empty list and a broken page is skipped.

use crate::client::{NotionClient, RecordStore, StoreError};
use crate::config::FeedConfig;
use crate::derived::{created_time, effective_date, full_width};
use crate::id::parse_page_id;
use crate::page_ids::all_page_ids;
use crate::properties::{PropertyBag, PropertyExtractor, SchemaProperties};
use crate::record_map::{Block, RecordMap, Schema};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::cmp::Reverse;
use thiserror::Error;

/// Errors that end a fetch before any post is produced
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("No database_id or page_id configured")]
    MissingRootId,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Output keys owned by the feed. Columns with these names are dropped.
pub const RESERVED_KEYS: [&str; 3] = ["id", "createdTime", "fullWidth"];

/// A normalized post: the extracted columns plus derived fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub id: String,
    #[serde(flatten)]
    pub properties: PropertyBag,
    #[serde(rename = "createdTime")]
    pub created_time: String,
    #[serde(rename = "fullWidth")]
    pub full_width: bool,
}

/// Result of a fetch that reached the store
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    /// Root block is not a collection view
    NotACollection { block_type: Option<String> },
    /// Collection has no schema
    MissingSchema,
    Posts {
        posts: Vec<PostRecord>,
        skipped: usize,
        failed: usize,
    },
}

impl FeedOutcome {
    pub fn into_posts(self) -> Vec<PostRecord> {
        match self {
            FeedOutcome::Posts { posts, .. } => posts,
            FeedOutcome::NotACollection { .. } | FeedOutcome::MissingSchema => Vec::new(),
        }
    }
}

/// Outcome of extracting one member page
#[derive(Debug)]
enum ItemOutcome {
    Post(Box<PostRecord>),
    Skipped,
    Failed,
}

/// Member page enumeration strategy
pub type PageIdSource = fn(&RecordMap) -> Vec<String>;

/// Post collection pipeline
pub struct PostFeed<S, X> {
    config: FeedConfig,
    store: S,
    extractor: X,
    page_ids: PageIdSource,
}

impl PostFeed<NotionClient, SchemaProperties<NotionClient>> {
    /// Feed backed by the Notion HTTP client
    pub fn notion(config: FeedConfig) -> Result<Self, StoreError> {
        let client = NotionClient::new(config.api.clone())?;
        let extractor = SchemaProperties::new(client.clone());
        Ok(Self::new(config, client, extractor))
    }
}

impl<S, X> PostFeed<S, X>
where
    S: RecordStore + Sync,
    X: PropertyExtractor + Sync,
{
    pub fn new(config: FeedConfig, store: S, extractor: X) -> Self {
        Self {
            config,
            store,
            extractor,
            page_ids: all_page_ids,
        }
    }

    /// Replace the member page enumeration
    #[must_use]
    pub fn with_page_ids(mut self, page_ids: PageIdSource) -> Self {
        self.page_ids = page_ids;
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Fetch and normalize the posts, newest first. Never fails.
    pub async fn posts(&self) -> Vec<PostRecord> {
        match self.try_posts().await {
            Ok(outcome) => outcome.into_posts(),
            Err(FeedError::MissingRootId) => {
                tracing::warn!("No Notion database_id or page_id configured");
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Error fetching Notion posts: {}", e);
                Vec::new()
            }
        }
    }

    /// The same pipeline, reporting why a fetch produced nothing.
    pub async fn try_posts(&self) -> Result<FeedOutcome, FeedError> {
        let root_id = self
            .config
            .notion
            .root_id()
            .ok_or(FeedError::MissingRootId)?;

        let snapshot = self.store.fetch_snapshot(root_id).await?;
        Ok(self.normalize(root_id, &snapshot).await)
    }

    /// Member page ids of the snapshot, as the feed would enumerate them
    pub fn page_ids(&self, snapshot: &RecordMap) -> Vec<String> {
        (self.page_ids)(snapshot)
    }

    /// Turn a fetched snapshot into sorted posts
    pub async fn normalize(&self, root_id: &str, snapshot: &RecordMap) -> FeedOutcome {
        let canonical = parse_page_id(root_id).unwrap_or_else(|| root_id.to_string());

        let root = snapshot.block(&canonical).and_then(Result::ok);
        if !root.as_ref().is_some_and(Block::is_collection_view) {
            let root_type = root.map(|block| block.block_type);
            tracing::warn!(
                "Not a collection view page: {} (type: {})",
                canonical,
                root_type.as_deref().unwrap_or("missing")
            );
            return FeedOutcome::NotACollection {
                block_type: root_type,
            };
        }

        let Some(schema) = snapshot.first_schema() else {
            tracing::warn!("No schema found in Notion response for {}", canonical);
            return FeedOutcome::MissingSchema;
        };

        let ids = self.page_ids(snapshot);
        let concurrency = self.config.posts.max_concurrent.max(1);
        let outcomes: Vec<ItemOutcome> = futures::stream::iter(ids.iter())
            .map(|id| self.extract_post(id, snapshot, &schema))
            .buffered(concurrency)
            .collect()
            .await;

        let (mut posts, skipped, failed) = outcomes.into_iter().fold(
            (Vec::new(), 0usize, 0usize),
            |(mut posts, skipped, failed), outcome| match outcome {
                ItemOutcome::Post(post) => {
                    posts.push(*post);
                    (posts, skipped, failed)
                }
                ItemOutcome::Skipped => (posts, skipped + 1, failed),
                ItemOutcome::Failed => (posts, skipped, failed + 1),
            },
        );

        sort_posts(&mut posts, &self.config.posts.date_property);
        tracing::info!(
            "Loaded {} posts from {} ({} skipped, {} failed)",
            posts.len(),
            canonical,
            skipped,
            failed
        );

        FeedOutcome::Posts {
            posts,
            skipped,
            failed,
        }
    }

    async fn extract_post(&self, id: &str, snapshot: &RecordMap, schema: &Schema) -> ItemOutcome {
        let mut properties = match self.extractor.extract(id, &snapshot.block, schema).await {
            Ok(Some(properties)) => properties,
            Ok(None) => return ItemOutcome::Skipped,
            Err(e) => {
                tracing::warn!("Skipping broken post: {}: {}", id, e);
                return ItemOutcome::Failed;
            }
        };

        let block = match snapshot.block(id) {
            Some(Ok(block)) => block,
            Some(Err(e)) => {
                tracing::warn!("Skipping broken post: {}: {}", id, e);
                return ItemOutcome::Failed;
            }
            None => Block::default(),
        };

        for key in RESERVED_KEYS {
            if properties.remove(key).is_some() {
                tracing::debug!("Column {} of {} shadowed by the derived field", key, id);
            }
        }

        ItemOutcome::Post(Box::new(PostRecord {
            id: id.to_string(),
            properties,
            created_time: created_time(block.created_time.as_ref(), Utc::now()),
            full_width: full_width(&block),
        }))
    }
}

/// Newest first by effective date. Stable: equal keys keep their order.
pub fn sort_posts(posts: &mut [PostRecord], date_property: &str) {
    posts.sort_by_cached_key(|post| {
        Reverse(effective_date(
            &post.properties,
            &post.created_time,
            date_property,
        ))
    });
}
