//! Cache of computed spectrogram columns.
//!
//! Keyed by quantized column time, spectrum length and window kind; nothing
//! about the view (zoom, frequency range, color map) enters the key, so those
//! can change without losing results. A byte-capped LRU evicts old columns,
//! with the currently visible set pinned during a paint.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::fft_analysis::WindowKind;

/// One computed column: `speclen + 1` dB magnitudes and the sample rate they
/// were computed at. Immutable once inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnData {
    pub db: Vec<f32>,
    pub sample_rate: u32,
}

impl ColumnData {
    fn bytes(&self) -> usize {
        self.db.len() * std::mem::size_of::<f32>()
    }
}

/// Quantizes a time to the column grid of the given pixel time step.
pub fn quantize_time(t: f64, secpp: f64) -> f64 {
    (t / secpp).round() * secpp
}

/// Cache key. Time is held in integer microseconds so identical column times
/// hash identically across recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub time_us: i64,
    pub speclen: usize,
    pub window: WindowKind,
}

impl ResultKey {
    pub fn new(column_time: f64, speclen: usize, window: WindowKind) -> ResultKey {
        ResultKey {
            time_us: (column_time * 1e6).round() as i64,
            speclen,
            window,
        }
    }

    pub fn time_secs(&self) -> f64 {
        self.time_us as f64 / 1e6
    }
}

struct CacheInner {
    map: HashMap<ResultKey, Arc<ColumnData>>,
    /// LRU order, front = oldest.
    lru: Vec<ResultKey>,
    total_bytes: usize,
    max_bytes: usize,
    pinned: HashSet<ResultKey>,
}

/// Thread-safe column store. A single lock protects the index; the column
/// vectors themselves are shared read-only.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
}

/// Default soft cap on cached magnitude bytes (~128 MB).
pub const DEFAULT_MAX_BYTES: usize = 128 * 1024 * 1024;

impl ResultCache {
    pub fn new(max_bytes: usize) -> ResultCache {
        ResultCache {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                lru: Vec::new(),
                total_bytes: 0,
                max_bytes,
                pinned: HashSet::new(),
            }),
        }
    }

    pub fn lookup(&self, key: &ResultKey) -> Option<Arc<ColumnData>> {
        let mut inner = self.inner.lock().unwrap();
        let hit = inner.map.get(key).cloned();
        if hit.is_some() {
            inner.lru.retain(|k| k != key);
            inner.lru.push(*key);
        }
        hit
    }

    pub fn contains(&self, key: &ResultKey) -> bool {
        self.inner.lock().unwrap().map.contains_key(key)
    }

    /// Inserts a column, replacing any previous entry under the same key.
    pub fn insert(&self, key: ResultKey, column: ColumnData) {
        let bytes = column.bytes();
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.map.insert(key, Arc::new(column)) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes());
            inner.lru.retain(|k| k != &key);
        }
        inner.total_bytes += bytes;
        inner.lru.push(key);

        // Evict oldest unpinned entries until back under the soft cap.
        while inner.total_bytes > inner.max_bytes {
            let victim = inner
                .lru
                .iter()
                .position(|k| !inner.pinned.contains(k));
            match victim {
                Some(pos) => {
                    let k = inner.lru.remove(pos);
                    if let Some(evicted) = inner.map.remove(&k) {
                        inner.total_bytes = inner.total_bytes.saturating_sub(evicted.bytes());
                    }
                }
                None => break, // everything left is pinned; soft cap yields
            }
        }
    }

    /// Drops every entry whose key matches the predicate.
    pub fn invalidate_by_predicate<P: Fn(&ResultKey) -> bool>(&self, p: P) {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<ResultKey> = inner.map.keys().filter(|k| p(*k)).cloned().collect();
        for key in &doomed {
            if let Some(column) = inner.map.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(column.bytes());
            }
        }
        inner.lru.retain(|k| !p(k));
        if !doomed.is_empty() {
            debug!("invalidated {} cached columns", doomed.len());
        }
    }

    pub fn drop_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.map.len();
        inner.map.clear();
        inner.lru.clear();
        inner.total_bytes = 0;
        if n > 0 {
            debug!("dropped all {} cached columns", n);
        }
    }

    /// Replaces the pinned set with the keys of the columns on screen; pinned
    /// entries survive eviction for the duration of the active paint.
    pub fn pin_visible<I: IntoIterator<Item = ResultKey>>(&self, keys: I) {
        let mut inner = self.inner.lock().unwrap();
        inner.pinned = keys.into_iter().collect();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(n: usize) -> ColumnData {
        ColumnData {
            db: vec![-10.0; n],
            sample_rate: 44100,
        }
    }

    fn key(t: f64) -> ResultKey {
        ResultKey::new(t, 1024, WindowKind::Kaiser)
    }

    #[test]
    fn lookup_after_insert() {
        let cache = ResultCache::new(DEFAULT_MAX_BYTES);
        assert!(cache.lookup(&key(1.0)).is_none());
        cache.insert(key(1.0), column(1025));
        let got = cache.lookup(&key(1.0)).unwrap();
        assert_eq!(got.db.len(), 1025);
    }

    #[test]
    fn insert_replaces_on_collision() {
        let cache = ResultCache::new(DEFAULT_MAX_BYTES);
        cache.insert(key(1.0), column(1025));
        let mut newer = column(1025);
        newer.db[0] = 99.0;
        cache.insert(key(1.0), newer);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&key(1.0)).unwrap().db[0], 99.0);
    }

    #[test]
    fn eviction_is_lru_and_respects_pins() {
        // Each column is 400 bytes; cap allows two.
        let cache = ResultCache::new(800);
        cache.insert(key(1.0), column(100));
        cache.insert(key(2.0), column(100));
        cache.pin_visible([key(1.0)]);
        cache.insert(key(3.0), column(100));
        // key(2.0) was the oldest unpinned entry.
        assert!(cache.contains(&key(1.0)));
        assert!(!cache.contains(&key(2.0)));
        assert!(cache.contains(&key(3.0)));
        assert!(cache.total_bytes() <= 800);
    }

    #[test]
    fn invalidate_by_speclen() {
        let cache = ResultCache::new(DEFAULT_MAX_BYTES);
        cache.insert(ResultKey::new(1.0, 1024, WindowKind::Hann), column(1025));
        cache.insert(ResultKey::new(2.0, 2048, WindowKind::Hann), column(2049));
        cache.invalidate_by_predicate(|k| k.speclen != 2048);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&ResultKey::new(2.0, 2048, WindowKind::Hann)));
    }

    #[test]
    fn drop_all_empties() {
        let cache = ResultCache::new(DEFAULT_MAX_BYTES);
        cache.insert(key(1.0), column(10));
        cache.insert(key(2.0), column(10));
        cache.drop_all();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn zoom_preserves_even_column_keys() {
        // Halving secpp doubles the column density; columns at even indices
        // of the new grid land on the old grid exactly.
        let secpp = 1.0 / 25.0;
        for k in 0..200i64 {
            let t = k as f64 * secpp;
            let old = ResultKey::new(quantize_time(t, secpp), 1024, WindowKind::Hann);
            let new = ResultKey::new(quantize_time(t, secpp / 2.0), 1024, WindowKind::Hann);
            assert_eq!(old, new, "column {} re-buckets under zoom", k);
        }
    }
}
