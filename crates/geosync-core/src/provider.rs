//! Read-only query surface for the map layer.
//!
//! `DataProvider` is the only type the rendering layer sees. Queries run
//! synchronously against the local store and never block on the network;
//! stale tiles are refreshed in the background through the coordinator and
//! show up on the next query.

use std::sync::Arc;

use geosync_types::{CacheEntry, Record, StoreError, Viewport};
use tracing::debug;

use crate::coordinator::SyncCoordinator;
use crate::store::LocalStore;

pub struct DataProvider {
    store: Arc<LocalStore>,
    coordinator: Arc<SyncCoordinator>,
}

impl DataProvider {
    pub fn new(store: Arc<LocalStore>, coordinator: Arc<SyncCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// Records currently cached for the viewport.
    ///
    /// Fires a background refresh for every stale tile the viewport
    /// touches and returns the immediate store snapshot over the tile
    /// cover. Because the snapshot spans whole tiles, results may include
    /// records up to one tile of granularity outside the viewport; callers
    /// wanting exact bounds filter on the record coordinates themselves.
    ///
    /// Refreshes are spawned onto the ambient Tokio runtime. Called from
    /// outside a runtime, the read still succeeds but no refresh is
    /// triggered.
    pub fn query(&self, viewport: &Viewport) -> Result<Vec<Record>, StoreError> {
        let tile_size = self.coordinator.config().tile_size_deg;
        let tiles = viewport.tiles(tile_size);
        debug!("Viewport query covers {} tiles", tiles.len());
        if tokio::runtime::Handle::try_current().is_ok() {
            for key in tiles {
                let _ = self.coordinator.ensure_fresh(key);
            }
        } else {
            debug!("No async runtime in scope; serving cache without refresh");
        }

        let cover = viewport.tile_cover_bounds(tile_size);
        let entries = self.store.get_region(&cover)?;
        Ok(entries.into_iter().map(|entry| entry.record).collect())
    }

    /// Look up a single record by identifier.
    pub fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.store.get(id)?.map(|entry: CacheEntry| entry.record))
    }
}
