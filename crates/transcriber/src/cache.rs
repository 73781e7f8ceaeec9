use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

use stemscore_domain::AnalysisResult;

use crate::config::TranscriptionConfig;

/// Hex SHA-256 over the input bytes, the serialized config and the
/// separation backend identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(bytes: &[u8], config: &TranscriptionConfig, backend: &str, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        // Config is plain data, so this cannot fail in practice; an empty
        // fingerprint still keys on the bytes.
        let fingerprint = serde_json::to_vec(config).unwrap_or_default();
        hasher.update((fingerprint.len() as u64).to_le_bytes());
        hasher.update(&fingerprint);
        hasher.update(backend.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct Entries {
    results: HashMap<CacheKey, AnalysisResult>,
    order: VecDeque<CacheKey>,
}

/// In-memory content-addressed store of finished results, evicting the
/// oldest entry once `capacity` is reached.
pub struct ResultCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries {
                results: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<AnalysisResult> {
        let entries = self.entries.lock().ok()?;
        let hit = entries.results.get(key).cloned();
        debug!(key = key.as_str(), hit = hit.is_some(), "result cache lookup");
        hit
    }

    pub fn insert(&self, key: CacheKey, result: AnalysisResult) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.results.insert(key.clone(), result).is_some() {
            return;
        }
        entries.order.push_back(key);
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.results.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.results.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemscore_domain::{Tempo, TimeSignature};

    fn result(duration: f64) -> AnalysisResult {
        AnalysisResult::new(
            Vec::new(),
            duration,
            Tempo::default(),
            TimeSignature::COMMON,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn key_depends_on_bytes_config_and_backend() {
        let config = TranscriptionConfig::default();
        let base = CacheKey::new(b"abc", &config, "spectral-mask", "0.1.0");
        assert_eq!(base, CacheKey::new(b"abc", &config, "spectral-mask", "0.1.0"));
        assert_eq!(base.as_str().len(), 64);
        assert_ne!(base, CacheKey::new(b"abd", &config, "spectral-mask", "0.1.0"));
        assert_ne!(base, CacheKey::new(b"abc", &config, "spectral-mask", "0.2.0"));

        let mut other = config.clone();
        other.loader.target_sample_rate = 22_050;
        assert_ne!(base, CacheKey::new(b"abc", &other, "spectral-mask", "0.1.0"));
    }

    #[test]
    fn evicts_oldest_entry() {
        let config = TranscriptionConfig::default();
        let cache = ResultCache::new(2);
        let keys: Vec<CacheKey> = [b"a", b"b", b"c"]
            .iter()
            .map(|bytes| CacheKey::new(*bytes, &config, "x", "1"))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            cache.insert(key.clone(), result(i as f64 + 1.0));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&keys[0]).is_none());
        assert_eq!(cache.get(&keys[2]).unwrap().duration(), 3.0);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResultCache::new(0);
        let key = CacheKey::new(b"a", &TranscriptionConfig::default(), "x", "1");
        cache.insert(key.clone(), result(1.0));
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());
    }
}
