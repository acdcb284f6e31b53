use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::debug;

use crate::dex::Dex;
use crate::errors::DexError;

const DEFAULT_CAPACITY: usize = 10;

struct CacheSlot {
    path: PathBuf,
    mtime: SystemTime,
    classes: Arc<HashSet<String>>,
    last_used: u64,
}

struct CacheInner {
    slots: Vec<CacheSlot>,
    tick: u64,
}

/// Shared cache of per-dex class sets, keyed on `(path, mtime)` so a
/// rewritten dex invalidates its own entry. Eviction removes the least
/// recently accessed slot. Class sets are handed out behind `Arc` and
/// never aliased mutably.
pub struct DexClassCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl Default for DexClassCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DexClassCache {
    pub fn with_capacity(capacity: usize) -> Self {
        DexClassCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                slots: Vec::new(),
                tick: 0,
            }),
        }
    }

    /// Loads the class set of `path`, serving from cache when the file
    /// is unchanged since it was last read.
    pub fn load(&self, path: &Path) -> Result<Arc<HashSet<String>>, DexError> {
        let mtime = std::fs::metadata(path)?.modified()?;

        {
            let mut inner = self.inner.lock().expect("dex cache poisoned");
            inner.tick += 1;
            let tick = inner.tick;

            if let Some(slot) = inner
                .slots
                .iter_mut()
                .find(|slot| slot.path == path && slot.mtime == mtime)
            {
                slot.last_used = tick;
                debug!("dex cache hit for {:?}", path);
                return Ok(Arc::clone(&slot.classes));
            }
        }

        // parse outside the lock; concurrent misses may parse twice but
        // insertion stays serialized
        let data = std::fs::read(path)?;
        let dex = Dex::new(data)?;
        if !dex.verify_checksum() {
            debug!("dex checksum mismatch for {:?} (patched file?)", path);
        }
        let classes = Arc::new(dex.class_names());

        let mut inner = self.inner.lock().expect("dex cache poisoned");
        inner.tick += 1;
        let tick = inner.tick;

        // another thread may have inserted while we parsed
        if let Some(slot) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.path == path && slot.mtime == mtime)
        {
            slot.last_used = tick;
            return Ok(Arc::clone(&slot.classes));
        }

        if inner.slots.len() >= self.capacity
            && let Some(evict) = inner
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(i, _)| i)
        {
            let evicted = inner.slots.swap_remove(evict);
            debug!("dex cache evicted {:?}", evicted.path);
        }

        inner.slots.push(CacheSlot {
            path: path.to_path_buf(),
            mtime,
            classes: Arc::clone(&classes),
            last_used: tick,
        });

        Ok(classes)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("dex cache poisoned").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
