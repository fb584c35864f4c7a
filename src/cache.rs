use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::synth::StreamDescriptor;

pub type CacheMap = BTreeMap<String, StreamDescriptor>;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("not base64: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("not a cache map: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Channel ID → descriptor map on disk, as base64-wrapped JSON so tokens
/// and URLs aren't readable at a glance. Not encryption.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing, unreadable or corrupt file is an empty cache.
    pub fn load(&self) -> CacheMap {
        match self.try_load() {
            Ok(map) => map,
            Err(e) => {
                warn!("Unable to load cache ({}): {}", self.path.display(), e);
                CacheMap::new()
            }
        }
    }

    pub fn try_load(&self) -> Result<CacheMap, CacheError> {
        if !self.path.exists() {
            return Ok(CacheMap::new());
        }

        let encoded = std::fs::read_to_string(&self.path)?;
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(CacheMap::new());
        }

        let json = STANDARD.decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Best effort, failures are only logged.
    pub fn save(&self, map: &CacheMap) {
        if let Err(e) = self.try_save(map) {
            warn!("Unable to save cache ({}): {}", self.path.display(), e);
        }
    }

    pub fn try_save(&self, map: &CacheMap) -> Result<(), CacheError> {
        let json = serde_json::to_vec(map)?;
        std::fs::write(&self.path, STANDARD.encode(json))?;
        Ok(())
    }
}

/// In-memory view of the store. Every mutation is written through while
/// the lock is held, so the file always matches the last mutation. The
/// file is a few KB and is written synchronously, also from async callers.
#[derive(Debug)]
pub struct StreamCache {
    store: CacheStore,
    entries: Mutex<CacheMap>,
}

impl StreamCache {
    pub fn open(store: CacheStore) -> Self {
        let entries = store.load();
        debug!(
            "Loaded {} cached streams from {}",
            entries.len(),
            store.path().display()
        );
        Self {
            store,
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> MutexGuard<'_, CacheMap> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, channel_id: &str) -> Option<StreamDescriptor> {
        self.entries().get(channel_id).cloned()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.entries().contains_key(channel_id)
    }

    pub fn insert(&self, channel_id: &str, descriptor: StreamDescriptor) {
        let mut entries = self.entries();
        entries.insert(channel_id.to_string(), descriptor);
        self.store.save(&entries);
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, channel_id: &str) -> bool {
        let mut entries = self.entries();
        let removed = entries.remove(channel_id).is_some();
        if removed {
            self.store.save(&entries);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Headers;

    fn descriptor(url: &str) -> StreamDescriptor {
        let mut headers = Headers::new();
        headers.insert("Referer".to_string(), "https://player.example.net/x".to_string());
        StreamDescriptor {
            destination_url: url.to_string(),
            request_headers: headers,
            endpoint_tag: "hls_manifest_proxy".to_string(),
        }
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));

        let mut map = CacheMap::new();
        map.insert("42".into(), descriptor("https://top1.newkso.ru/top1/cdn/42/mono.m3u8"));
        map.insert("7".into(), descriptor("https://zekonew.newkso.ru/zeko/7/mono.m3u8"));
        store.try_save(&map).unwrap();

        assert_eq!(store.load(), map);

        // obfuscated, not plaintext
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("newkso"));

        let before = std::fs::read(store.path()).unwrap();
        store.save(&store.load());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn corrupt_or_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let store = CacheStore::new(&path);

        assert!(store.load().is_empty());

        std::fs::write(&path, "!!! not base64 !!!").unwrap();
        assert!(store.load().is_empty());

        std::fs::write(&path, STANDARD.encode("[1, 2, 3]")).unwrap();
        assert!(store.load().is_empty());

        std::fs::write(&path, "").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("missing").join("cache"));
        store.save(&CacheMap::new());
        assert!(store.try_save(&CacheMap::new()).is_err());
    }

    #[test]
    fn concurrent_inserts_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let cache = std::sync::Arc::new(StreamCache::open(CacheStore::new(&path)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.insert(&i.to_string(), descriptor(&format!("https://a/{}/mono.m3u8", i)))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(CacheStore::new(&path).load(), cache.entries().clone());
        assert_eq!(CacheStore::new(&path).load().len(), 8);
    }

    #[test]
    fn write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        let cache = StreamCache::open(CacheStore::new(&path));
        assert!(cache.is_empty());
        cache.insert("42", descriptor("https://a/mono.m3u8"));
        assert_eq!(CacheStore::new(&path).load().len(), 1);

        let reopened = StreamCache::open(CacheStore::new(&path));
        assert_eq!(
            reopened.get("42").map(|d| d.destination_url),
            Some("https://a/mono.m3u8".to_string())
        );

        assert!(reopened.remove("42"));
        assert!(!reopened.remove("42"));
        assert!(CacheStore::new(&path).load().is_empty());
    }
}
