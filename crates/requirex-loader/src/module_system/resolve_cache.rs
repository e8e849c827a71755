// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Cache of specifier resolutions with a reverse index for invalidation

use crate::error::{LoaderError, Result};
use crate::module_system::resolver::{ResolutionContext, Resolved};
use dashmap::DashMap;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity of a resolution request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    specifier: String,
    module_directory: String,
    basedir: PathBuf,
    /// Hash of the remaining inputs that change the outcome
    profile: u64,
}

impl ResolveKey {
    /// Key for resolving `specifier` under `context`
    pub fn new(specifier: &str, context: &ResolutionContext) -> Self {
        let mut hasher = DefaultHasher::new();
        context.extensions.hash(&mut hasher);
        context.paths.hash(&mut hasher);
        context.preserve_symlinks.hash(&mut hasher);
        context.manifest.hash(&mut hasher);

        Self {
            specifier: specifier.to_string(),
            module_directory: context.module_directory.clone(),
            basedir: context.base_directory.clone(),
            profile: hasher.finish(),
        }
    }
}

/// Cached outcome; misses are cached as well as hits
#[derive(Debug, Clone)]
enum Cached {
    Found(Resolved),
    Missing(LoaderError),
}

/// Thread-safe resolution cache
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: DashMap<ResolveKey, Cached>,
    /// Resolved path to the keys that produced it
    reverse_index: DashMap<PathBuf, HashSet<ResolveKey>>,
    hits: AtomicUsize,
}

impl ResolveCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached outcome for `key`
    pub fn get(&self, key: &ResolveKey) -> Option<Result<Resolved>> {
        let entry = self.entries.get(key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(match entry.value() {
            Cached::Found(resolved) => Ok(resolved.clone()),
            Cached::Missing(err) => Err(err.clone()),
        })
    }

    /// Record an outcome. Only successes and not-found failures are kept;
    /// other errors may be transient.
    pub fn put(&self, key: ResolveKey, outcome: &Result<Resolved>) {
        let cached = match outcome {
            Ok(resolved) => {
                if let Resolved::Path(path) = resolved {
                    self.reverse_index
                        .entry(path.clone())
                        .or_default()
                        .insert(key.clone());
                }
                Cached::Found(resolved.clone())
            }
            Err(err) if err.is_not_found() => Cached::Missing(err.clone()),
            Err(_) => return,
        };
        self.entries.insert(key, cached);
    }

    /// Drop entries that resolved to `path`, plus every cached miss since a
    /// new file may now satisfy it. Returns the number of entries removed.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let mut count = 0;
        if let Some((_, keys)) = self.reverse_index.remove(path) {
            for key in keys {
                if self.entries.remove(&key).is_some() {
                    count += 1;
                }
            }
        }

        let before = self.entries.len();
        self.entries
            .retain(|_, cached| matches!(cached, Cached::Found(_)));
        count += before.saturating_sub(self.entries.len());

        if count > 0 {
            tracing::debug!(path = %path.display(), count, "Invalidated resolutions");
        }
        count
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
        self.reverse_index.clear();
    }

    /// Number of cached outcomes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}
