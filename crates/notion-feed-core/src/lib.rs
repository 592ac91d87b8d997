//! notion-feed - Notion database to post list pipeline
//!
//! Fetches a Notion collection view through the private `api/v3` endpoints
//! and normalizes its member pages into a flat, newest-first post list.

pub mod client;
pub mod config;
pub mod derived;
pub mod id;
pub mod page_ids;
pub mod posts;
pub mod properties;
pub mod record_map;

pub use client::{NotionClient, NotionUser, RecordStore, StoreError};
pub use config::{ApiConfig, ConfigError, FeedConfig, NotionSource, PostsConfig};
pub use posts::{FeedError, FeedOutcome, PostFeed, PostRecord};
pub use properties::{
    DateRange, ExtractError, Person, PropertyBag, PropertyExtractor, PropertyValue,
    SchemaProperties,
};
pub use record_map::{Block, ColumnSchema, ColumnType, RecordMap, RecordTable, Schema};
