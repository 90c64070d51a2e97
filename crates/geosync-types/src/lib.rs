//! # Geosync Types
//!
//! Domain models and error definitions for the geosync engine.
//!
//! This crate provides the foundational type system for geosync:
//!
//! - **`error`** - Typed error hierarchy for decoding, fetching, and storage
//! - **`models`** - Domain models (Record, Region, Viewport, cursors, config)
//!
//! ## Architecture Role
//!
//! `geosync-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!         geosync-types (this crate)
//!                 │
//!                 ▼
//!           geosync-core
//!                 │
//!                 ▼
//!         application shell (map UI)
//! ```
//!
//! All types are designed to be:
//! - **Serializable** via serde for persistence and diagnostics
//! - **Clone** for cheap sharing across async boundaries
//! - **PartialEq** for testing and comparison

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{CodecError, FetchError, StoreError, SyncError};

// Re-export core model types
pub use models::{
    CacheEntry, EngineConfig, EvictionPolicy, Record, Region, RegionKey, SyncCursor, Viewport,
};
