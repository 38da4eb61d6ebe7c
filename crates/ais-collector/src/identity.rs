//! MMSI to IMO resolution
//!
//! The registry is authoritative; the in-memory map is a cache of it, extended
//! as static data reveals new pairs. The map is never evicted: it holds at
//! most one entry per transponder seen, and its size is reported with the
//! periodic statistics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::{Imo, Mmsi};
use crate::store::{StoreResult, VesselStore};

/// Distinct-vessel counts for the observability metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coverage {
    /// Distinct MMSIs seen in region
    pub seen: usize,
    /// Distinct MMSIs for which an IMO was known at least once
    pub resolved: usize,
    /// Entries in the MMSI to IMO map
    pub mapped: usize,
}

impl Coverage {
    /// Fraction of seen vessels with a known identity, in percent
    pub fn ratio_percent(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.resolved as f64 * 100.0 / self.seen as f64
        }
    }
}

pub struct IdentityResolver<S> {
    store: Arc<S>,
    mapping: HashMap<Mmsi, Imo>,
    seen: HashSet<Mmsi>,
    resolved: HashSet<Mmsi>,
}

impl<S: VesselStore> IdentityResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            mapping: HashMap::new(),
            seen: HashSet::new(),
            resolved: HashSet::new(),
        }
    }

    /// Populate the map from every (MMSI, IMO) pair in the registry
    pub async fn load_from_store(&mut self) -> StoreResult<usize> {
        let pairs = self.store.load_identities().await?;
        self.mapping.extend(pairs);

        info!(mappings = self.mapping.len(), "Loaded MMSI to IMO mappings");
        Ok(self.mapping.len())
    }

    /// Map first, then the registry; a registry hit is cached
    ///
    /// A failed registry query is logged and treated as a miss.
    pub async fn resolve(&mut self, mmsi: Mmsi) -> Option<Imo> {
        if let Some(&imo) = self.mapping.get(&mmsi) {
            self.resolved.insert(mmsi);
            return Some(imo);
        }

        match self.store.find_imo_by_mmsi(mmsi).await {
            Ok(Some(imo)) => {
                debug!(mmsi, imo, "Resolved MMSI from registry");
                self.mapping.insert(mmsi, imo);
                // Counted as covered even though no static data was seen this run
                self.resolved.insert(mmsi);
                Some(imo)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(mmsi, error = %e, "Registry lookup failed, treating MMSI as unresolved");
                None
            }
        }
    }

    /// Static data revealed `imo` for `mmsi`; last writer wins
    pub fn record(&mut self, mmsi: Mmsi, imo: Imo) {
        if let Some(previous) = self.mapping.insert(mmsi, imo) {
            if previous != imo {
                debug!(mmsi, previous, imo, "MMSI remapped to a new IMO");
            }
        }
        self.resolved.insert(mmsi);
    }

    /// Count `mmsi` as seen in region
    pub fn observe(&mut self, mmsi: Mmsi) {
        self.seen.insert(mmsi);
    }

    pub fn coverage(&self) -> Coverage {
        Coverage {
            seen: self.seen.len(),
            resolved: self.resolved.len(),
            mapped: self.mapping.len(),
        }
    }
}
