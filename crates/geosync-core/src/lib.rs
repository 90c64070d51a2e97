//! # Geosync Core
//!
//! Geodata synchronization and caching engine.
//!
//! ```text
//! geosync-core/src/
//! ├── codec.rs        # Raw payload ↔ Record conversion (skip-and-count)
//! ├── store.rs        # SQLite-backed record + cursor persistence
//! ├── fetcher.rs      # HTTP region fetch with retry/backoff
//! ├── coordinator.rs  # Per-region sync state machine and dedup
//! ├── provider.rs     # Read-only viewport query surface for the map layer
//! └── logging.rs      # tracing subscriber setup for the app shell
//! ```
//!
//! The engine is a library: the application shell constructs a
//! [`store::LocalStore`], wires it into a [`coordinator::SyncCoordinator`]
//! together with a [`fetcher::RegionFetch`] implementation, and hands the
//! map layer a [`provider::DataProvider`]. Reads never block on the
//! network; sync failures surface on the coordinator's event channel while
//! the read path keeps serving cached data.

pub mod codec;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod paths;
pub mod provider;
pub mod store;

pub use coordinator::{AutoRefreshHandle, SyncCoordinator, SyncEvent, SyncPhase, SyncTicket};
pub use error::{EngineError, EngineResult};
pub use fetcher::{HttpFetcher, RawBatch, RegionFetch};
pub use provider::DataProvider;
pub use store::{LocalStore, MergeStats, UpsertOutcome};
