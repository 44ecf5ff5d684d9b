use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

/// Process wide memory of torrent hashes. A blacklisted hash is never retried
/// for any item; a downloaded hash short-circuits the availability check when
/// the matching torrent id is already recorded on the item.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, HashState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashState {
    Blacklisted,
    Downloaded,
}

impl HashCache {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("Hash cache file is corrupted, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::error!("Failed to read hash cache file: {e}");
                HashMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn is_blacklisted(&self, hash: &str) -> bool {
        self.entries.lock().unwrap().get(hash) == Some(&HashState::Blacklisted)
    }

    pub fn is_downloaded(&self, hash: &str) -> bool {
        self.entries.lock().unwrap().get(hash) == Some(&HashState::Downloaded)
    }

    pub fn blacklist(&self, hash: &str) {
        let mut entries = self.entries.lock().unwrap();
        if entries.insert(hash.to_string(), HashState::Blacklisted) != Some(HashState::Blacklisted)
        {
            tracing::debug!("Blacklisted hash {hash}");
            self.persist(&entries);
        }
    }

    pub fn mark_downloaded(&self, hash: &str) {
        let mut entries = self.entries.lock().unwrap();
        // blacklist wins over downloaded
        if entries.get(hash) == Some(&HashState::Blacklisted) {
            return;
        }
        if entries.insert(hash.to_string(), HashState::Downloaded) != Some(HashState::Downloaded) {
            self.persist(&entries);
        }
    }

    pub fn blacklisted_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|state| **state == HashState::Blacklisted)
            .count()
    }

    fn persist(&self, entries: &HashMap<String, HashState>) {
        let contents = match serde_json::to_string(entries) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!("Failed to serialize hash cache: {e}");
                return;
            }
        };
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::write(&tmp, contents).and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            tracing::error!("Failed to write hash cache file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(name: &str) -> HashCache {
        let path = std::env::temp_dir().join(format!("hash-cache-test-{name}.json"));
        let _ = std::fs::remove_file(&path);
        HashCache::load(path)
    }

    #[test]
    fn three_states() {
        let cache = temp_cache("states");
        let hash = "a".repeat(40);
        assert!(!cache.is_blacklisted(&hash));
        assert!(!cache.is_downloaded(&hash));

        cache.mark_downloaded(&hash);
        assert!(cache.is_downloaded(&hash));
        assert!(!cache.is_blacklisted(&hash));

        cache.blacklist(&hash);
        assert!(cache.is_blacklisted(&hash));
        assert!(!cache.is_downloaded(&hash));
    }

    #[test]
    fn blacklist_survives_reload() {
        let path = std::env::temp_dir().join("hash-cache-test-reload.json");
        let _ = std::fs::remove_file(&path);
        {
            let cache = HashCache::load(&path);
            cache.blacklist("deadbeef");
        }
        let cache = HashCache::load(&path);
        assert!(cache.is_blacklisted("deadbeef"));
    }

    #[test]
    fn blacklist_wins_over_downloaded() {
        let cache = temp_cache("precedence");
        cache.blacklist("beef");
        cache.mark_downloaded("beef");
        assert!(cache.is_blacklisted("beef"));
    }
}
