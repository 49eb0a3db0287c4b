// Table Metadata Cache
//
// Bounded LRU cache of table schemas with per-entry expiry. Concurrent misses
// on the same key share one catalog load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use linked_hash_map::LinkedHashMap;
use log::debug;
use parking_lot::{Condvar, Mutex};

use super::meta::TableMeta;
use crate::config::TableMetaConfig;
use crate::driver::Conn;
use crate::error::{AtError, Result};

/// Reads a table schema from the database catalog
pub trait TableMetaLoader: Send + Sync {
    fn load_one(&self, conn: &mut dyn Conn, schema: &str, table: &str) -> Result<TableMeta>;
}

struct CacheEntry {
    meta: Arc<TableMeta>,
    loaded_at: Instant,
}

/// Failure of a shared load, replayed to every waiter with the same kind
#[derive(Debug, Clone)]
enum LoadFailure {
    NotFound(String),
    Schema(String),
}

impl LoadFailure {
    fn from_error(key: &str, e: &AtError) -> Self {
        match e {
            AtError::NotFound(msg) => LoadFailure::NotFound(msg.clone()),
            other => LoadFailure::Schema(format!("loading {} failed: {}", key, other)),
        }
    }

    fn into_error(self) -> AtError {
        match self {
            LoadFailure::NotFound(msg) => AtError::NotFound(msg),
            LoadFailure::Schema(msg) => AtError::Schema(msg),
        }
    }
}

/// Rendezvous for callers waiting on an in-flight load
struct LoadSlot {
    result: Mutex<Option<std::result::Result<Arc<TableMeta>, LoadFailure>>>,
    ready: Condvar,
}

impl LoadSlot {
    fn new() -> Self {
        LoadSlot { result: Mutex::new(None), ready: Condvar::new() }
    }

    fn wait(&self) -> std::result::Result<Arc<TableMeta>, LoadFailure> {
        let mut result = self.result.lock();
        loop {
            if let Some(outcome) = result.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut result);
        }
    }

    fn complete(&self, outcome: std::result::Result<Arc<TableMeta>, LoadFailure>) {
        *self.result.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

struct CacheState {
    /// Least recently used entry first
    entries: LinkedHashMap<String, CacheEntry>,
    loading: HashMap<String, Arc<LoadSlot>>,
}

/// Cache of table metadata for one database dialect
pub struct TableMetaCache {
    loader: Arc<dyn TableMetaLoader>,
    capacity: usize,
    expire: Duration,
    state: Mutex<CacheState>,
}

enum Lookup {
    Hit(Arc<TableMeta>),
    Wait(Arc<LoadSlot>),
    Load(Arc<LoadSlot>),
}

impl TableMetaCache {
    pub fn new(loader: Arc<dyn TableMetaLoader>, capacity: usize, expire: Duration) -> Self {
        TableMetaCache {
            loader,
            capacity: capacity.max(1),
            expire,
            state: Mutex::new(CacheState { entries: LinkedHashMap::new(), loading: HashMap::new() }),
        }
    }

    pub fn from_config(loader: Arc<dyn TableMetaLoader>, config: &TableMetaConfig) -> Self {
        Self::new(loader, config.capacity, Duration::from_secs(config.expire_secs))
    }

    /// Get the metadata of `schema.table`, loading it through `conn` on a
    /// miss or after the cached entry expired
    pub fn get_table_meta(&self, conn: &mut dyn Conn, schema: &str, table: &str) -> Result<Arc<TableMeta>> {
        if table.trim().is_empty() {
            return Err(AtError::Schema("table name is empty".to_string()));
        }
        let key = format!("{}.{}", schema, table);

        let lookup = {
            let mut state = self.state.lock();
            let fresh = state
                .entries
                .get_refresh(&key)
                .filter(|entry| entry.loaded_at.elapsed() < self.expire)
                .map(|entry| entry.meta.clone());
            if let Some(meta) = fresh {
                Lookup::Hit(meta)
            } else {
                state.entries.remove(&key);
                if let Some(slot) = state.loading.get(&key).cloned() {
                    Lookup::Wait(slot)
                } else {
                    let slot = Arc::new(LoadSlot::new());
                    state.loading.insert(key.clone(), slot.clone());
                    Lookup::Load(slot)
                }
            }
        };

        match lookup {
            Lookup::Hit(meta) => Ok(meta),
            Lookup::Wait(slot) => slot.wait().map_err(LoadFailure::into_error),
            Lookup::Load(slot) => {
                debug!("Loading table metadata for {}", key);
                let loaded = self.loader.load_one(conn, schema, table).map(Arc::new);

                {
                    let mut state = self.state.lock();
                    state.loading.remove(&key);
                    if let Ok(meta) = &loaded {
                        state.entries.insert(key.clone(), CacheEntry { meta: meta.clone(), loaded_at: Instant::now() });
                        while state.entries.len() > self.capacity {
                            if let Some((evicted, _)) = state.entries.pop_front() {
                                debug!("Evicted table metadata for {}", evicted);
                            }
                        }
                    }
                }

                match loaded {
                    Ok(meta) => {
                        slot.complete(Ok(meta.clone()));
                        Ok(meta)
                    }
                    Err(e) => {
                        slot.complete(Err(LoadFailure::from_error(&key, &e)));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Drop a cached table so the next lookup reloads it
    pub fn invalidate(&self, schema: &str, table: &str) {
        self.state.lock().entries.remove(&format!("{}.{}", schema, table));
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of cached tables
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
