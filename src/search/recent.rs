//! Most-recently-selected record ids, persisted across sessions.
//!
//! Storage problems never reach the caller: an unreadable or corrupt list
//! reads as empty and a failed write is logged.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use crate::storage::StorageManager;

/// Versioned storage key; bump the suffix if the stored shape changes.
pub const RECENT_KEY: &str = "recentIds.v1";

pub const MAX_RECENT: usize = 5;

/// Moves `id` to the front (inserting it if absent) and truncates.
pub fn push_front(list: Vec<String>, id: &str) -> Vec<String> {
    std::iter::once(id.to_string())
        .chain(list.into_iter().filter(|x| x != id))
        .take(MAX_RECENT)
        .collect()
}

/// Clones share one write lock, so concurrent `remember`s on the same
/// tracker never drop each other's ids.
#[derive(Clone)]
pub struct RecencyTracker {
    store: Arc<dyn StorageManager>,
    write_lock: Arc<Mutex<()>>,
}

impl RecencyTracker {
    pub fn new(store: Arc<dyn StorageManager>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn remember(&self, id: &str) {
        if id.is_empty() {
            return;
        }

        // held across read-modify-write; a poisoned lock guards no data
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let updated = push_front(self.list(), id);
        let data = match serde_json::to_vec(&updated) {
            Ok(data) => data,
            Err(e) => {
                log::error!("recent: failed to encode list: {e}");
                return;
            }
        };

        if let Err(e) = self.store.write(RECENT_KEY, &data) {
            log::warn!("recent: failed to persist list: {e}");
        }
    }

    pub fn list(&self) -> Vec<String> {
        if !self.store.exists(RECENT_KEY) {
            return vec![];
        }

        let data = match self.store.read(RECENT_KEY) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("recent: failed to read list: {e}");
                return vec![];
            }
        };

        match serde_json::from_slice::<Vec<String>>(&data) {
            Ok(ids) => sanitize(ids),
            Err(e) => {
                log::warn!("recent: ignoring corrupt list: {e}");
                vec![]
            }
        }
    }
}

/// Drops empty and duplicate ids from a list written by someone else.
fn sanitize(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .take(MAX_RECENT)
        .collect()
}
