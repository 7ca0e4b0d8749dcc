use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::site::Site;

/// Lazily built `site` snapshot shared by every render until invalidated.
#[derive(Debug, Default)]
pub struct SiteCache {
    snapshot: RwLock<Option<Arc<Value>>>,
}

impl SiteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, site: &dyn Site) -> Arc<Value> {
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            return Arc::clone(snapshot);
        }

        let mut slot = self.snapshot.write();
        // Another render may have filled it between the two locks.
        if let Some(snapshot) = slot.as_ref() {
            return Arc::clone(snapshot);
        }
        tracing::debug!("building site snapshot");
        let snapshot = Arc::new(site.to_value());
        *slot = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn invalidate(&self) {
        if self.snapshot.write().take().is_some() {
            tracing::debug!("site snapshot invalidated");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.snapshot.read().is_some()
    }
}
