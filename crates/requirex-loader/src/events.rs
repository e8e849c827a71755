// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader lifecycle events
//!
//! Listeners are plain synchronous callbacks. An `Error` listener may return
//! [`Disposition::Ignore`] to keep the failed module in the cache with its
//! error as the exported value instead of propagating the failure.

use crate::error::LoaderError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A lifecycle signal raised while loading a module
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// Source read is about to start
    Load {
        /// Module being loaded
        target: PathBuf,
        /// Module that required it, if any
        source: Option<PathBuf>,
        /// Whether the synchronous path is used
        sync: bool,
    },
    /// Source read finished
    Loaded {
        /// Module being loaded
        target: PathBuf,
        /// Module that required it, if any
        source: Option<PathBuf>,
        /// Time spent reading
        duration: Duration,
        /// Source length in bytes
        size: usize,
    },
    /// Evaluation is about to start
    Evaluate {
        /// Module being evaluated
        target: PathBuf,
        /// Module that required it, if any
        source: Option<PathBuf>,
        /// Whether the synchronous path is used
        sync: bool,
    },
    /// Evaluation finished successfully
    Evaluated {
        /// Module that was evaluated
        target: PathBuf,
        /// Module that required it, if any
        source: Option<PathBuf>,
        /// Time spent evaluating
        duration: Duration,
        /// Number of modules in the cache afterwards
        cache_size: usize,
        /// Whether the synchronous path was used
        sync: bool,
    },
    /// Evaluation failed
    Error {
        /// Module that failed
        target: PathBuf,
        /// Module that required it, if any
        source: Option<PathBuf>,
        /// The failure
        error: LoaderError,
    },
}

/// Discriminant of [`LoaderEvent`], used to subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`LoaderEvent::Load`]
    Load,
    /// [`LoaderEvent::Loaded`]
    Loaded,
    /// [`LoaderEvent::Evaluate`]
    Evaluate,
    /// [`LoaderEvent::Evaluated`]
    Evaluated,
    /// [`LoaderEvent::Error`]
    Error,
}

impl LoaderEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Load { .. } => EventKind::Load,
            Self::Loaded { .. } => EventKind::Loaded,
            Self::Evaluate { .. } => EventKind::Evaluate,
            Self::Evaluated { .. } => EventKind::Evaluated,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Module the event is about
    pub fn target(&self) -> &PathBuf {
        match self {
            Self::Load { target, .. }
            | Self::Loaded { target, .. }
            | Self::Evaluate { target, .. }
            | Self::Evaluated { target, .. }
            | Self::Error { target, .. } => target,
        }
    }
}

/// What a listener wants done with the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Default handling
    #[default]
    Propagate,
    /// Suppress an error; only meaningful for [`EventKind::Error`]
    Ignore,
}

/// Handle returned by [`LoaderEvents::on`], used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&LoaderEvent) -> Disposition + Send + Sync>;

struct Listener {
    id: ListenerId,
    callback: Callback,
    once: bool,
}

/// Registry of lifecycle listeners
#[derive(Default)]
pub struct LoaderEvents {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl LoaderEvents {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&LoaderEvent) -> Disposition + Send + Sync + 'static,
    {
        self.add_listener(kind, Arc::new(callback), false)
    }

    /// Add a listener that is removed after its first call
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&LoaderEvent) -> Disposition + Send + Sync + 'static,
    {
        self.add_listener(kind, Arc::new(callback), true)
    }

    fn add_listener(&self, kind: EventKind, callback: Callback, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Listener { id, callback, once });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|l| l.id == id) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove all listeners for one kind, or for every kind
    pub fn remove_all(&self, kind: Option<EventKind>) {
        let mut listeners = self.listeners.write();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    /// Number of listeners for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Call every listener for the event's kind in registration order.
    ///
    /// Returns [`Disposition::Ignore`] if any listener asked to ignore it.
    pub fn emit(&self, event: &LoaderEvent) -> Disposition {
        let kind = event.kind();
        let callbacks: Vec<Callback> = {
            let mut listeners = self.listeners.write();
            let Some(list) = listeners.get_mut(&kind) else {
                return Disposition::Propagate;
            };
            let callbacks = list.iter().map(|l| Arc::clone(&l.callback)).collect();
            list.retain(|l| !l.once);
            callbacks
        };

        // Called outside the lock so listeners may (un)register
        let mut disposition = Disposition::Propagate;
        for callback in callbacks {
            if callback(event) == Disposition::Ignore {
                disposition = Disposition::Ignore;
            }
        }
        disposition
    }
}

impl fmt::Debug for LoaderEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("LoaderEvents")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn load_event() -> LoaderEvent {
        LoaderEvent::Load {
            target: PathBuf::from("/app/a.js"),
            source: None,
            sync: false,
        }
    }

    #[test]
    fn test_on_and_off() {
        let events = LoaderEvents::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = events.on(EventKind::Load, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Disposition::Propagate
        });

        events.emit(&load_event());
        events.emit(&load_event());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(events.off(EventKind::Load, id));
        assert!(!events.off(EventKind::Load, id));
        events.emit(&load_event());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once() {
        let events = LoaderEvents::new();
        events.once(EventKind::Load, |_| Disposition::Propagate);
        assert_eq!(events.listener_count(EventKind::Load), 1);
        events.emit(&load_event());
        assert_eq!(events.listener_count(EventKind::Load), 0);
    }

    #[test]
    fn test_ignore_wins() {
        let events = LoaderEvents::new();
        events.on(EventKind::Error, |_| Disposition::Propagate);
        events.on(EventKind::Error, |_| Disposition::Ignore);

        let event = LoaderEvent::Error {
            target: PathBuf::from("/app/bad.js"),
            source: None,
            error: LoaderError::evaluation("/app/bad.js", "boom"),
        };
        assert_eq!(events.emit(&event), Disposition::Ignore);
        assert_eq!(events.emit(&load_event()), Disposition::Propagate);

        events.remove_all(None);
        assert_eq!(events.listener_count(EventKind::Error), 0);
    }
}
