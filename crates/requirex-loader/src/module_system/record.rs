// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records and their load state

use crate::error::{LoaderError, Result};
use crate::module_system::workspace::WorkspaceId;
use crate::value::Exports;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Load state of a module record
#[derive(Debug, Clone)]
pub enum ModuleState {
    /// Placeholder inserted, nothing done yet
    Created,
    /// Execution scope is ready
    ScopeBuilt,
    /// Source is running
    Executing,
    /// Exports are final
    Loaded,
    /// Evaluation failed; the record has been evicted
    Failed(LoaderError),
}

impl ModuleState {
    /// Whether the state is final
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed(_))
    }
}

/// A module in the cache
pub struct ModuleRecord {
    filename: PathBuf,
    dirname: PathBuf,
    exports: RwLock<Exports>,
    state: watch::Sender<ModuleState>,
    parent: Weak<ModuleRecord>,
    children: Mutex<Vec<Arc<ModuleRecord>>>,
    workspaces: Vec<WorkspaceId>,
    /// Modules this one is currently loading or waiting on
    awaiting: Mutex<Vec<PathBuf>>,
}

impl ModuleRecord {
    /// Create a record in the `Created` state with empty exports
    pub fn new(
        filename: PathBuf,
        parent: Option<&Arc<ModuleRecord>>,
        workspaces: Vec<WorkspaceId>,
    ) -> Arc<Self> {
        let dirname = filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let (state, _) = watch::channel(ModuleState::Created);
        Arc::new(Self {
            filename,
            dirname,
            exports: RwLock::new(Exports::empty()),
            state,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            children: Mutex::new(Vec::new()),
            workspaces,
            awaiting: Mutex::new(Vec::new()),
        })
    }

    /// Absolute path of the module
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Directory containing the module
    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    /// Current exports (partial while the module is still executing)
    pub fn exports(&self) -> Exports {
        self.exports.read().clone()
    }

    /// Replace the exports
    pub fn set_exports(&self, exports: Exports) {
        *self.exports.write() = exports;
    }

    /// Mutate the exports in place
    pub fn with_exports_mut<R>(&self, f: impl FnOnce(&mut Exports) -> R) -> R {
        f(&mut *self.exports.write())
    }

    /// Current state
    pub fn state(&self) -> ModuleState {
        self.state.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: ModuleState) {
        tracing::trace!(module = %self.filename.display(), ?state, "Module state change");
        self.state.send_replace(state);
    }

    /// Whether the module finished loading successfully
    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.borrow(), ModuleState::Loaded)
    }

    /// Whether the module is loaded or failed
    pub fn is_settled(&self) -> bool {
        self.state.borrow().is_settled()
    }

    /// Wait until the record settles and return its exports or failure
    pub async fn wait(&self) -> Result<Exports> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(ModuleState::is_settled).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so it cannot be dropped while we wait
            Err(_) => return Err(LoaderError::evaluation(&self.filename, "module record dropped")),
        };
        match state {
            ModuleState::Failed(err) => Err(err),
            _ => Ok(self.exports()),
        }
    }

    /// Result of a settled record, `None` while in flight
    pub fn outcome(&self) -> Option<Result<Exports>> {
        match self.state() {
            ModuleState::Loaded => Some(Ok(self.exports())),
            ModuleState::Failed(err) => Some(Err(err)),
            _ => None,
        }
    }

    /// Module that first required this one
    pub fn parent(&self) -> Option<Arc<ModuleRecord>> {
        self.parent.upgrade()
    }

    /// Modules first loaded by this one, in load order
    pub fn children(&self) -> Vec<Arc<ModuleRecord>> {
        self.children.lock().clone()
    }

    pub(crate) fn add_child(&self, child: &Arc<ModuleRecord>) {
        let mut children = self.children.lock();
        if !children.iter().any(|c| c.filename == child.filename) {
            children.push(Arc::clone(child));
        }
    }

    /// Workspaces the module was evaluated in
    pub fn workspaces(&self) -> &[WorkspaceId] {
        &self.workspaces
    }

    pub(crate) fn begin_awaiting(&self, path: &Path) {
        self.awaiting.lock().push(path.to_path_buf());
    }

    pub(crate) fn end_awaiting(&self, path: &Path) {
        let mut awaiting = self.awaiting.lock();
        if let Some(idx) = awaiting.iter().position(|p| p == path) {
            awaiting.swap_remove(idx);
        }
    }

    pub(crate) fn awaiting(&self) -> Vec<PathBuf> {
        self.awaiting.lock().clone()
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("filename", &self.filename)
            .field("state", &*self.state.borrow())
            .field("children", &self.children.lock().len())
            .finish()
    }
}
