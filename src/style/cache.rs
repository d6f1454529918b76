//! Process-wide cache of compiled utility CSS, keyed by class-set
//! fingerprint.
//!
//! Capacity-bounded LRU behind a `Mutex`. Compilation happens outside the
//! lock, so two requests racing on the same fingerprint both compile and the
//! second insert just refreshes the entry.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

static GLOBAL: OnceLock<Arc<StyleCache>> = OnceLock::new();

/// Capacity used when [`StyleCache::global`] is reached before
/// [`StyleCache::init_global`].
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct StyleCache {
    capacity: usize,
    inner: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Default)]
struct Entries {
    css: HashMap<String, Arc<str>>,
    /// Least recently used at the front.
    order: VecDeque<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl StyleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Install the process-wide cache. Returns the already-installed cache
    /// as the error if one exists.
    pub fn init_global(capacity: usize) -> Result<Arc<StyleCache>, Arc<StyleCache>> {
        let cache = Arc::new(StyleCache::new(capacity));
        match GLOBAL.set(cache.clone()) {
            Ok(()) => Ok(cache),
            Err(_) => Err(Self::global()),
        }
    }

    /// The process-wide cache, created with [`DEFAULT_CAPACITY`] on first
    /// use if nobody initialised it.
    pub fn global() -> Arc<StyleCache> {
        GLOBAL
            .get_or_init(|| Arc::new(StyleCache::new(DEFAULT_CAPACITY)))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic mid-update leaves at worst a stale order entry.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a fingerprint, marking it most recently used.
    pub fn get(&self, fingerprint: &str) -> Option<Arc<str>> {
        let mut entries = self.lock();
        let css = entries.css.get(fingerprint).cloned()?;
        touch(&mut entries.order, fingerprint);
        Some(css)
    }

    pub fn insert(&self, fingerprint: &str, css: Arc<str>) {
        let mut entries = self.lock();
        if entries.css.insert(fingerprint.to_string(), css).is_some() {
            touch(&mut entries.order, fingerprint);
            return;
        }
        entries.order.push_back(fingerprint.to_string());
        while entries.css.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.css.remove(&oldest);
            log::debug!("style cache evicted {oldest}");
        }
    }

    /// Return the cached CSS for `fingerprint`, compiling and caching it on a
    /// miss. The flag is `true` on a hit.
    pub fn get_or_compile(
        &self,
        fingerprint: &str,
        compile: impl FnOnce() -> String,
    ) -> (Arc<str>, bool) {
        if let Some(css) = self.get(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("style cache hit {fingerprint}");
            return (css, true);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!("style cache miss {fingerprint}");
        let css: Arc<str> = Arc::from(compile());
        self.insert(fingerprint, css.clone());
        (css, false)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().css.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn touch(order: &mut VecDeque<String>, fingerprint: &str) {
    if let Some(pos) = order.iter().position(|k| k == fingerprint) {
        if let Some(key) = order.remove(pos) {
            order.push_back(key);
        }
    }
}
