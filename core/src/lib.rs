//! Local hierarchical document store: folders and tagged notes kept in independently
//! named storage units, each backed by its own embedded document database.
//!
//! *   [`storage`] holds the path codec, the database engines and the per-unit
//!     [`DocumentClient`](storage::DocumentClient).
//! *   [`cache`] holds the [`DataStore`](cache::DataStore), the in-memory view that
//!     front ends read from.

pub mod cache;
pub mod config;
pub mod event;
pub mod storage;

pub use cache::{DataStore, StoreChange};
pub use config::StoreConfig;
