//! DropMind Core - capture anything, find it again
//!
//! Ingests loose pieces of content (notes, links, files, images, places),
//! classifies them, files them into clipboards and keeps them searchable
//! through a Tantivy word index backed by SQLite. Links get a smart card
//! (title, description, preview image) fetched in the background.

mod clipboards;
pub mod config;
pub mod content_detection;
pub mod database;
mod engine;
pub mod enrichment;
pub mod geocoding;
pub mod indexer;
mod ingest;
pub mod interface;
pub mod link_metadata;
mod locks;
pub mod models;
pub mod ranking;
mod search;
mod store;

pub use config::Config;
pub use engine::Engine;
pub use interface::*;
pub use store::{DropMind, DropMindBuilder, DATABASE_FILENAME, INDEX_DIRNAME};
