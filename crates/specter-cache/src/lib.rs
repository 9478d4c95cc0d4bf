use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use specter_core::{Modality, RequestContent};
use tokio::sync::RwLock;

/// Entries are considered fresh for one hour after insertion.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Capacity of the single-model service cache.
pub const SERVICE_CACHE_CAPACITY: usize = 100;

/// Capacity of the router-level cache.
pub const ROUTER_CACHE_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// Deterministic cache key over (model, modality, content, context).
///
/// Image requests key on their ordered path list; audio requests on the raw
/// payload bytes.
pub fn response_cache_key(
    model: &str,
    modality: Modality,
    content: &RequestContent,
    context: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0x1f]);
    hasher.update(modality.as_str().as_bytes());
    hasher.update([0x1f]);
    match content {
        RequestContent::Text(text) => hasher.update(text.as_bytes()),
        RequestContent::Images(paths) => {
            for path in paths {
                hasher.update(path.to_string_lossy().as_bytes());
                hasher.update([0x1f]);
            }
        }
        RequestContent::Audio(payload) => hasher.update(payload),
    }
    hasher.update([0x1f]);
    hasher.update(context.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Bounded cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    text: String,
    inserted_at: Instant,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// Bounded response cache: freshness is a pure function of age, evaluated
/// on every read, and capacity overflow evicts the oldest-inserted entry.
///
/// Expired entries are not proactively purged; they stay in the map until
/// overwritten or evicted. Overwriting a key refreshes its timestamp but
/// keeps its original insertion position.
pub struct BoundedCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    capacity: usize,
}

impl BoundedCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, DEFAULT_TTL)
    }

    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    /// Return the cached text if present and still fresh.
    pub async fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.text.clone())
    }

    /// Insert or overwrite, then evict the oldest-inserted entry while over
    /// capacity.
    pub async fn put(&self, key: impl Into<String>, text: impl Into<String>) {
        let key = key.into();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let entry = CacheEntry {
            text: text.into(),
            inserted_at: Instant::now(),
        };
        if state.entries.insert(key.clone(), entry).is_none() {
            state.order.push_back(key);
        }

        while state.entries.len() > self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}
