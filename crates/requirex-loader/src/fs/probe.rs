// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Memoized filesystem probes
//!
//! Every probe first confirms that the parent directory exists, so a missing
//! directory answers for its whole subtree without further I/O. "Not found"
//! and "not a directory" are normal answers and are cached; any other I/O
//! error is returned to the caller and left uncached.

use crate::error::{LoaderError, Result};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Whether loader work runs on tokio or blocks the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Non-blocking tokio I/O
    Async,
    /// Blocking std I/O, for the synchronous loader path
    Sync,
}

/// Cache of stat results and directory listings keyed by path
#[derive(Debug, Default)]
pub struct ProbeCache {
    /// `None` records a path known not to exist
    stats: DashMap<PathBuf, Option<Metadata>>,
    /// Sorted entry names, `None` for a missing directory
    listings: DashMap<PathBuf, Option<Arc<[String]>>>,
    /// Number of real filesystem calls issued
    operations: AtomicUsize,
}

impl ProbeCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `path`, or `None` if it does not exist
    pub async fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        self.stat_with(path, IoMode::Async).await
    }

    /// Blocking form of [`ProbeCache::stat`]
    pub fn stat_sync(&self, path: &Path) -> Result<Option<Metadata>> {
        futures::executor::block_on(self.stat_with(path, IoMode::Sync))
    }

    /// Whether `path` is an existing directory
    pub async fn is_dir(&self, path: &Path) -> Result<bool> {
        self.is_dir_with(path, IoMode::Async).await
    }

    /// Blocking form of [`ProbeCache::is_dir`]
    pub fn is_dir_sync(&self, path: &Path) -> Result<bool> {
        futures::executor::block_on(self.is_dir_with(path, IoMode::Sync))
    }

    /// Whether `path` is an existing file (FIFOs count as files)
    pub async fn is_file(&self, path: &Path) -> Result<bool> {
        self.is_file_with(path, IoMode::Async).await
    }

    /// Blocking form of [`ProbeCache::is_file`]
    pub fn is_file_sync(&self, path: &Path) -> Result<bool> {
        futures::executor::block_on(self.is_file_with(path, IoMode::Sync))
    }

    /// Sorted entry names of a directory, or `None` if it does not exist
    pub async fn read_dir(&self, path: &Path) -> Result<Option<Arc<[String]>>> {
        self.read_dir_with(path, IoMode::Async).await
    }

    /// Blocking form of [`ProbeCache::read_dir`]
    pub fn read_dir_sync(&self, path: &Path) -> Result<Option<Arc<[String]>>> {
        futures::executor::block_on(self.read_dir_with(path, IoMode::Sync))
    }

    pub(crate) async fn is_dir_with(&self, path: &Path, mode: IoMode) -> Result<bool> {
        Ok(self
            .stat_with(path, mode)
            .await?
            .is_some_and(|meta| meta.is_dir()))
    }

    pub(crate) async fn is_file_with(&self, path: &Path, mode: IoMode) -> Result<bool> {
        Ok(self
            .stat_with(path, mode)
            .await?
            .is_some_and(|meta| is_file_like(&meta)))
    }

    pub(crate) fn stat_with<'a>(
        &'a self,
        path: &'a Path,
        mode: IoMode,
    ) -> BoxFuture<'a, Result<Option<Metadata>>> {
        async move {
            if let Some(hit) = self.stats.get(path) {
                return Ok(hit.clone());
            }

            if let Some(parent) = parent_of(path) {
                let parent_is_dir = self
                    .stat_with(parent, mode)
                    .await?
                    .is_some_and(|meta| meta.is_dir());
                if !parent_is_dir {
                    self.stats.insert(path.to_path_buf(), None);
                    return Ok(None);
                }
            }

            self.operations.fetch_add(1, Ordering::Relaxed);
            let result = match mode {
                IoMode::Async => tokio::fs::metadata(path).await,
                IoMode::Sync => std::fs::metadata(path),
            };

            match result {
                Ok(meta) => {
                    self.stats.insert(path.to_path_buf(), Some(meta.clone()));
                    Ok(Some(meta))
                }
                Err(e) if is_missing(&e) => {
                    self.stats.insert(path.to_path_buf(), None);
                    Ok(None)
                }
                Err(e) => Err(LoaderError::io(path, e)),
            }
        }
        .boxed()
    }

    pub(crate) async fn read_dir_with(
        &self,
        path: &Path,
        mode: IoMode,
    ) -> Result<Option<Arc<[String]>>> {
        if let Some(hit) = self.listings.get(path) {
            return Ok(hit.clone());
        }

        if !self.is_dir_with(path, mode).await? {
            self.listings.insert(path.to_path_buf(), None);
            return Ok(None);
        }

        self.operations.fetch_add(1, Ordering::Relaxed);
        let result = match mode {
            IoMode::Async => read_names(path).await,
            IoMode::Sync => read_names_sync(path),
        };

        match result {
            Ok(mut names) => {
                names.sort();
                let names: Arc<[String]> = names.into();
                self.listings
                    .insert(path.to_path_buf(), Some(Arc::clone(&names)));
                Ok(Some(names))
            }
            Err(e) if is_missing(&e) => {
                self.listings.insert(path.to_path_buf(), None);
                Ok(None)
            }
            Err(e) => Err(LoaderError::io(path, e)),
        }
    }

    /// Resolve symlinks in `path`. Not cached: callers cache the final
    /// resolution instead.
    pub(crate) async fn canonicalize_with(&self, path: &Path, mode: IoMode) -> Result<PathBuf> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let result = match mode {
            IoMode::Async => tokio::fs::canonicalize(path).await,
            IoMode::Sync => std::fs::canonicalize(path),
        };
        result.map_err(|e| LoaderError::io(path, e))
    }

    /// Read a small metadata file such as a package manifest. Counted, not
    /// cached.
    pub(crate) async fn read_text_with(&self, path: &Path, mode: IoMode) -> Result<String> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let result = match mode {
            IoMode::Async => tokio::fs::read_to_string(path).await,
            IoMode::Sync => std::fs::read_to_string(path),
        };
        result.map_err(|e| LoaderError::io(path, e))
    }

    /// Forget everything known about `path` and its parent's listing
    pub fn invalidate(&self, path: &Path) {
        self.stats.remove(path);
        self.listings.remove(path);
        if let Some(parent) = parent_of(path) {
            self.listings.remove(parent);
        }
    }

    /// Drop every cached probe
    pub fn clear(&self) {
        self.stats.clear();
        self.listings.clear();
    }

    /// Number of cached stat results
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether no stat result is cached
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Number of filesystem calls issued so far
    pub fn fs_operations(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }
}

fn parent_of(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

#[cfg(unix)]
fn is_file_like(meta: &Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.is_file() || meta.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_file_like(meta: &Metadata) -> bool {
    meta.is_file()
}

async fn read_names(path: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn read_names_sync(path: &Path) -> std::io::Result<Vec<String>> {
    std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect()
}
