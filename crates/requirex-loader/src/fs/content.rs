// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module source reader with in-flight de-duplication
//!
//! A second request for a path that is already being read attaches to the
//! pending read instead of issuing its own. Completed reads are kept in a
//! content cache until invalidated. Invalidating a path detaches its pending
//! read, which then completes for its waiters without being cached.

use crate::error::{LoaderError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

type SharedRead = Shared<BoxFuture<'static, Result<Arc<str>>>>;

struct Pending {
    ticket: u64,
    read: SharedRead,
}

/// Reads module source text, asynchronously or synchronously
#[derive(Clone)]
pub struct ContentLoader {
    inner: Arc<Inner>,
}

struct Inner {
    /// Reads currently in progress
    in_flight: DashMap<PathBuf, Pending>,
    /// Completed reads
    contents: DashMap<PathBuf, Arc<str>>,
    /// Bounds the number of simultaneous reads
    permits: Semaphore,
    /// Physical reads issued
    reads: AtomicUsize,
    next_ticket: AtomicU64,
}

impl ContentLoader {
    /// Create a loader allowing `simultaneous` reads at once
    pub fn new(simultaneous: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                in_flight: DashMap::new(),
                contents: DashMap::new(),
                permits: Semaphore::new(simultaneous.max(1)),
                reads: AtomicUsize::new(0),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Read `path` as UTF-8 text
    pub async fn load(&self, path: &Path) -> Result<Arc<str>> {
        if let Some(text) = self.inner.contents.get(path) {
            return Ok(Arc::clone(text.value()));
        }

        let read = match self.inner.in_flight.entry(path.to_path_buf()) {
            Entry::Occupied(pending) => {
                tracing::trace!(path = %path.display(), "Attaching to in-flight read");
                pending.get().read.clone()
            }
            Entry::Vacant(slot) => {
                // A read may have completed between the cache check and here
                if let Some(text) = self.inner.contents.get(path) {
                    return Ok(Arc::clone(text.value()));
                }
                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let owned = path.to_path_buf();
                let read = async move { inner.read(owned, ticket).await }
                    .boxed()
                    .shared();
                slot.insert(Pending {
                    ticket,
                    read: read.clone(),
                });
                read
            }
        };

        read.await
    }

    /// Blocking read of `path`, sharing the content cache
    pub fn load_sync(&self, path: &Path) -> Result<Arc<str>> {
        if let Some(text) = self.inner.contents.get(path) {
            return Ok(Arc::clone(text.value()));
        }

        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        let text: Arc<str> = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::io(path, e))?
            .into();
        self.inner
            .contents
            .insert(path.to_path_buf(), Arc::clone(&text));
        Ok(text)
    }

    /// Drop cached content for `path` and detach any pending read of it
    pub fn invalidate(&self, path: &Path) {
        self.inner.in_flight.remove(path);
        self.inner.contents.remove(path);
    }

    /// Drop all cached content and detach every pending read
    pub fn clear(&self) {
        self.inner.in_flight.clear();
        self.inner.contents.clear();
    }

    /// Number of physical reads issued so far
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::Relaxed)
    }

    /// Number of reads currently pending
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl Default for ContentLoader {
    fn default() -> Self {
        Self::new(10)
    }
}

impl fmt::Debug for ContentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentLoader")
            .field("cached", &self.inner.contents.len())
            .field("in_flight", &self.inner.in_flight.len())
            .field("reads", &self.reads())
            .finish()
    }
}

impl Inner {
    async fn read(self: Arc<Self>, path: PathBuf, ticket: u64) -> Result<Arc<str>> {
        let result = match self.permits.acquire().await {
            Ok(_permit) => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(path = %path.display(), "Reading module source");
                tokio::fs::read_to_string(&path).await
            }
            Err(_) => Err(std::io::Error::other("read limiter closed")),
        };

        let result = match result {
            Ok(text) => {
                let text: Arc<str> = text.into();
                // Holding the marker keeps an invalidation from slipping in
                // between the check and the insert
                match self.in_flight.get(&path) {
                    Some(pending) if pending.ticket == ticket => {
                        self.contents.insert(path.clone(), Arc::clone(&text));
                    }
                    _ => tracing::trace!(path = %path.display(), "Discarding read of invalidated source"),
                }
                Ok(text)
            }
            Err(e) => Err(LoaderError::io(&path, e)),
        };

        // Content is published before the marker goes away so a late request
        // never starts a second read.
        self.in_flight.remove_if(&path, |_, pending| pending.ticket == ticket);
        result
    }
}
