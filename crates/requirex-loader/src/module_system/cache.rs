// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache keyed by resolved path

use crate::module_system::record::ModuleRecord;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Thread-safe store of module records
#[derive(Debug, Default)]
pub struct ModuleCache {
    /// Records by resolved path
    modules: DashMap<PathBuf, Arc<ModuleRecord>>,
    /// `(device, inode)` to the first path seen for that file, when hard-link
    /// aliasing is enabled
    links: Option<DashMap<(u64, u64), PathBuf>>,
}

impl ModuleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that treats hard links to one file as one module
    pub fn link_aware() -> Self {
        Self {
            modules: DashMap::new(),
            links: Some(DashMap::new()),
        }
    }

    /// Whether hard-link aliasing is enabled
    pub fn is_link_aware(&self) -> bool {
        self.links.is_some()
    }

    /// Cache key for `path`. With hard-link aliasing, every link to a file
    /// maps to the first path it was seen under.
    pub fn key_for(&self, path: &Path, meta: Option<&Metadata>) -> PathBuf {
        match (&self.links, meta.and_then(file_identity)) {
            (Some(links), Some(identity)) => links
                .entry(identity)
                .or_insert_with(|| path.to_path_buf())
                .value()
                .clone(),
            _ => path.to_path_buf(),
        }
    }

    /// Get a module by path
    pub fn get(&self, path: &Path) -> Option<Arc<ModuleRecord>> {
        self.modules.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a module is cached
    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    /// Return the record for `path`, inserting the one built by `create` if
    /// there is none. The flag is `true` when the caller's record was
    /// inserted and the caller is therefore responsible for evaluating it.
    pub fn get_or_insert_with<F>(&self, path: &Path, create: F) -> (Arc<ModuleRecord>, bool)
    where
        F: FnOnce() -> Arc<ModuleRecord>,
    {
        match self.modules.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(slot) => {
                let record = create();
                slot.insert(Arc::clone(&record));
                (record, true)
            }
        }
    }

    /// Add a module to the cache
    pub fn insert(&self, record: Arc<ModuleRecord>) {
        self.modules.insert(record.filename().to_path_buf(), record);
    }

    /// Remove a module from the cache
    pub fn remove(&self, path: &Path) -> Option<Arc<ModuleRecord>> {
        if let Some(links) = &self.links {
            links.retain(|_, first| first.as_path() != path);
        }
        self.modules.remove(path).map(|(_, record)| record)
    }

    /// Remove `record` only if it is still the cached entry for its path
    pub(crate) fn evict(&self, record: &Arc<ModuleRecord>) {
        let removed = self
            .modules
            .remove_if(record.filename(), |_, cached| Arc::ptr_eq(cached, record));
        if removed.is_some() {
            tracing::debug!(module = %record.filename().display(), "Evicted module");
        }
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.modules.clear();
        if let Some(links) = &self.links {
            links.clear();
        }
    }

    /// Get all cached module paths
    pub fn keys(&self) -> Vec<PathBuf> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of cached modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str) -> Arc<ModuleRecord> {
        ModuleRecord::new(PathBuf::from(path), None, Vec::new())
    }

    #[test]
    fn test_placeholder_inserted_once() {
        let cache = ModuleCache::new();
        let path = Path::new("/app/a.js");

        let (first, created) = cache.get_or_insert_with(path, || record("/app/a.js"));
        assert!(created);
        let (second, created) = cache.get_or_insert_with(path, || record("/app/a.js"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_only_current_record() {
        let cache = ModuleCache::new();
        let stale = record("/app/a.js");
        let fresh = record("/app/a.js");
        cache.insert(Arc::clone(&fresh));

        cache.evict(&stale);
        assert!(cache.contains(Path::new("/app/a.js")));
        cache.evict(&fresh);
        assert!(cache.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_links_share_key() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("a.js");
        let link = dir.path().join("b.js");
        std::fs::write(&original, "").unwrap();
        std::fs::hard_link(&original, &link).unwrap();

        let cache = ModuleCache::link_aware();
        let meta_a = std::fs::metadata(&original).unwrap();
        let meta_b = std::fs::metadata(&link).unwrap();
        assert_eq!(cache.key_for(&original, Some(&meta_a)), original);
        assert_eq!(cache.key_for(&link, Some(&meta_b)), original);

        let plain = ModuleCache::new();
        assert_eq!(plain.key_for(&link, Some(&meta_b)), link);
    }
}
