//! Domain models for the geosync engine.

mod config;
mod record;
mod region;

pub use config::{EngineConfig, EvictionPolicy};
pub use record::{CacheEntry, Record, SyncCursor};
pub use region::{Region, RegionKey, Viewport};
