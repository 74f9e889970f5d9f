//! Investigation Cache (§4.8): fingerprint -> analysis store with TTL expiry.
//! Grounded on `logic/baseline/storage.rs`'s whole-file JSON rewrite pattern.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{AnomalyEvent, InvestigationCacheEntry};

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    #[serde(flatten)]
    entries: HashMap<String, InvestigationCacheEntry>,
}

pub struct InvestigationCache {
    path: PathBuf,
    ttl: ChronoDuration,
    entries: Mutex<HashMap<String, InvestigationCacheEntry>>,
}

/// MD5 of `"{type}:{message}"`, truncated to 16 hex chars.
pub fn fingerprint(event: &AnomalyEvent) -> String {
    let digest = md5::compute(event.fingerprint_source().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

impl InvestigationCache {
    /// Reads tolerate a missing or unreadable file by treating the cache as
    /// empty — never an error to the caller.
    pub fn load(path: impl Into<PathBuf>, ttl: std::time::Duration) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str::<CacheFile>(&contents).ok())
            .map(|f| f.entries)
            .unwrap_or_default();
        InvestigationCache {
            path,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1)),
            entries: Mutex::new(entries),
        }
    }

    /// Returns the entry if present and not older than the TTL. A cache hit
    /// does not refresh `timestamp` (§9 Open Questions) — only `set` bumps
    /// `count`.
    pub fn get(&self, event: &AnomalyEvent) -> Option<InvestigationCacheEntry> {
        let key = fingerprint(event);
        let guard = self.entries.lock();
        let entry = guard.get(&key)?;
        if Utc::now() - entry.timestamp < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Upserts the fingerprint's entry. On an existing key, `count` is
    /// incremented and the stored analysis replaced; on a new key, the
    /// entry starts at count=1. Writes are best-effort: a failed write is
    /// logged, never propagated, and leaves the in-memory state applied.
    pub fn set(&self, event: &AnomalyEvent, analysis: impl Into<String>) {
        let key = fingerprint(event);
        {
            let mut guard = self.entries.lock();
            let entry = guard
                .entry(key.clone())
                .or_insert_with(|| InvestigationCacheEntry {
                    key: key.clone(),
                    timestamp: Utc::now(),
                    event_type: event.event_type.as_str().to_string(),
                    event_message: event.message.clone(),
                    analysis: String::new(),
                    count: 0,
                });
            entry.analysis = analysis.into();
            entry.count += 1;
        }
        self.persist();
    }

    fn persist(&self) {
        let snapshot = self.entries.lock().clone();
        let file = CacheFile { entries: snapshot };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Some(parent) = self.path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        log::error!("failed to create cache directory {:?}: {}", parent, e);
                        return;
                    }
                }
                if let Err(e) = fs::write(&self.path, json) {
                    log::error!("failed to persist investigation cache to {:?}: {}", self.path, e);
                }
            }
            Err(e) => log::error!("failed to serialize investigation cache: {}", e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
