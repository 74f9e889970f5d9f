//! Allowlist Store (§4.10) and its network-tool sibling. Grounded on
//! `logic/action_guard.rs`'s `WHITELIST: RwLock<Vec<String>>` plus
//! `logic/baseline/storage.rs`'s whole-file JSON rewrite persistence.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{AllowlistEntry, AllowlistEntryType};

#[derive(Debug)]
pub struct AllowlistError(pub String);

impl std::fmt::Display for AllowlistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "allowlist error: {}", self.0)
    }
}
impl std::error::Error for AllowlistError {}

/// First whitespace token of a pattern, auto-selects `base` typing.
const SAFE_BASE_SET: &[&str] = &[
    "top", "ps", "df", "free", "uptime", "vm_stat", "vmstat", "iostat", "netstat", "lsof", "who",
    "w", "last", "dmesg", "journalctl",
];

#[derive(Serialize, Deserialize, Default)]
struct AllowlistFile {
    commands: Vec<AllowlistEntry>,
}

pub struct AllowlistStore {
    path: PathBuf,
    entries: RwLock<Vec<AllowlistEntry>>,
}

impl AllowlistStore {
    /// Reads on a corrupt or missing file yield an empty store — never an
    /// error to the caller.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str::<AllowlistFile>(&c).ok())
            .map(|f| f.commands)
            .unwrap_or_default();
        AllowlistStore {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Auto-selects a type when `entry_type` is omitted: if the first token
    /// of `pattern` is in SAFE_BASE_SET, type=base and the stored pattern is
    /// just that token; otherwise type=exact and the stored pattern is the
    /// full command. Duplicate (pattern,type) insertions are silent no-ops.
    pub fn add(
        &self,
        pattern: &str,
        entry_type: Option<AllowlistEntryType>,
    ) -> Result<(), AllowlistError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(AllowlistError("pattern must not be empty".to_string()));
        }

        let (stored_pattern, stored_type) = match entry_type {
            Some(t) => (pattern.to_string(), t),
            None => {
                let first_token = pattern.split_whitespace().next().unwrap_or(pattern);
                if SAFE_BASE_SET.contains(&first_token) {
                    (first_token.to_string(), AllowlistEntryType::Base)
                } else {
                    (pattern.to_string(), AllowlistEntryType::Exact)
                }
            }
        };

        {
            let mut guard = self.entries.write();
            let exists = guard
                .iter()
                .any(|e| e.pattern == stored_pattern && e.entry_type == stored_type);
            if exists {
                return Ok(());
            }
            guard.push(AllowlistEntry {
                pattern: stored_pattern,
                entry_type: stored_type,
                added: Utc::now(),
            });
        }
        self.persist();
        Ok(())
    }

    /// Deletes all entries whose pattern equals `pattern` (any type).
    /// Returns whether at least one entry matched.
    pub fn remove(&self, pattern: &str) -> bool {
        let removed = {
            let mut guard = self.entries.write();
            let before = guard.len();
            guard.retain(|e| e.pattern != pattern);
            before != guard.len()
        };
        if removed {
            self.persist();
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.persist();
    }

    pub fn is_allowed(&self, cmd: &str) -> bool {
        let first_token = cmd.split_whitespace().next().unwrap_or("");
        self.entries.read().iter().any(|e| match e.entry_type {
            AllowlistEntryType::Base => first_token == e.pattern,
            AllowlistEntryType::Exact => cmd == e.pattern,
            AllowlistEntryType::Prefix => {
                cmd == e.pattern || cmd.starts_with(&format!("{} ", e.pattern))
            }
        })
    }

    pub fn entries(&self) -> Vec<AllowlistEntry> {
        self.entries.read().clone()
    }

    fn persist(&self) {
        let commands = self.entries.read().clone();
        let file = AllowlistFile { commands };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Some(parent) = self.path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        log::error!("failed to create allowlist directory {:?}: {}", parent, e);
                        return;
                    }
                }
                // §7 PersistenceError: the in-memory update is already applied
                // above; a failed write is logged and reconciled by the next
                // successful write.
                if let Err(e) = fs::write(&self.path, json) {
                    log::error!("failed to persist allowlist to {:?}: {}", self.path, e);
                }
            }
            Err(e) => log::error!("failed to serialize allowlist: {}", e),
        }
    }
}

/// Structurally identical to AllowlistStore but keyed by hostname pattern
/// rather than command base (§4.11's "parallel but structurally identical
/// gate" for network tools).
pub struct NetworkAllowlistStore {
    path: PathBuf,
    hosts: RwLock<Vec<String>>,
}

#[derive(Serialize, Deserialize, Default)]
struct NetworkAllowlistFile {
    hosts: Vec<String>,
}

impl NetworkAllowlistStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hosts = fs::read_to_string(&path)
            .ok()
            .and_then(|c| serde_json::from_str::<NetworkAllowlistFile>(&c).ok())
            .map(|f| f.hosts)
            .unwrap_or_default();
        NetworkAllowlistStore {
            path,
            hosts: RwLock::new(hosts),
        }
    }

    pub fn add(&self, host: &str) -> Result<(), AllowlistError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(AllowlistError("host must not be empty".to_string()));
        }
        {
            let mut guard = self.hosts.write();
            if guard.iter().any(|h| h == host) {
                return Ok(());
            }
            guard.push(host.to_string());
        }
        self.persist();
        Ok(())
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.hosts.read().iter().any(|h| h == host)
    }

    fn persist(&self) {
        let hosts = self.hosts.read().clone();
        let file = NetworkAllowlistFile { hosts };
        if let Ok(json) = serde_json::to_string_pretty(&file) {
            if let Some(parent) = self.path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::write(&self.path, json) {
                log::error!("failed to persist network allowlist to {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_then_is_allowed() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("ps aux", None).unwrap();
        assert!(store.is_allowed("ps aux"));
    }

    #[test]
    fn auto_select_base_type_for_safe_commands() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("top -bn1", None).unwrap();
        let entries = store.entries();
        assert_eq!(entries[0].pattern, "top");
        assert_eq!(entries[0].entry_type, AllowlistEntryType::Base);
        assert!(store.is_allowed("top -bn1"));
        assert!(store.is_allowed("top"));
    }

    #[test]
    fn auto_select_exact_type_for_unsafe_commands() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("rm -rf /tmp/x", None).unwrap();
        let entries = store.entries();
        assert_eq!(entries[0].entry_type, AllowlistEntryType::Exact);
        assert!(store.is_allowed("rm -rf /tmp/x"));
        assert!(!store.is_allowed("rm -rf /tmp/y"));
    }

    #[test]
    fn duplicate_insertions_are_silent_no_ops() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("ps aux", None).unwrap();
        store.add("ps aux", None).unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn empty_pattern_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        assert!(store.add("   ", None).is_err());
    }

    #[test]
    fn remove_deletes_all_matching_entries_regardless_of_type() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("top", Some(AllowlistEntryType::Base)).unwrap();
        store.add("top", Some(AllowlistEntryType::Exact)).unwrap();
        assert!(store.remove("top"));
        assert!(!store.is_allowed("top"));
        assert!(!store.remove("top"));
    }

    #[test]
    fn corrupt_file_loads_as_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("allowlist.json");
        fs::write(&path, "{ not json").unwrap();
        let store = AllowlistStore::load(&path);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn prefix_type_matches_exact_or_prefixed_commands() {
        let dir = TempDir::new().unwrap();
        let store = AllowlistStore::load(dir.path().join("allowlist.json"));
        store.add("git status", Some(AllowlistEntryType::Prefix)).unwrap();
        assert!(store.is_allowed("git status"));
        assert!(store.is_allowed("git status --short"));
        assert!(!store.is_allowed("git statusx"));
    }
}
