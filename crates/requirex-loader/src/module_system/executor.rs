// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Execution contract for module source
//!
//! An [`Executor`] runs the text of one module inside a [`ModuleContext`].
//! Executors are registered per file extension; files without a registered
//! executor go to the default one.

use crate::error::Result;
use crate::fs::IoMode;
use crate::module_system::record::ModuleRecord;
use crate::module_system::require::Loader;
use crate::module_system::resolver::{ResolveOptions, Resolved};
use crate::module_system::script::ModScript;
use crate::module_system::workspace::{IsolatedScope, WorkspaceId};
use crate::value::Exports;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs module source
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `source` for the module in `ctx`, writing its exports to
    /// `ctx.record`.
    ///
    /// With [`IoMode::Sync`] the executor must not wait on anything that
    /// needs an async runtime: nested requires go through
    /// [`Require::load_sync`].
    async fn execute(&self, ctx: &ModuleContext, source: &str, mode: IoMode) -> Result<()>;
}

/// Bindings handed to an executor
pub struct ModuleContext {
    /// The module's record, holding its exports
    pub record: Arc<ModuleRecord>,
    /// Scope for global lookups and writes
    pub scope: Arc<IsolatedScope>,
    /// Loads dependencies relative to the module
    pub require: Require,
    /// Absolute path of the module
    pub filename: PathBuf,
    /// Directory of the module
    pub dirname: PathBuf,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("filename", &self.filename)
            .finish()
    }
}

/// `require` bound to one module: resolves from its directory and records
/// it as the parent of whatever it loads
#[derive(Clone)]
pub struct Require {
    loader: Loader,
    parent: Arc<ModuleRecord>,
    workspaces: Vec<WorkspaceId>,
}

impl Require {
    pub(crate) fn new(loader: Loader, parent: Arc<ModuleRecord>, workspaces: Vec<WorkspaceId>) -> Self {
        Self {
            loader,
            parent,
            workspaces,
        }
    }

    fn options(&self) -> ResolveOptions {
        ResolveOptions::new()
            .parent(Arc::clone(&self.parent))
            .workspaces(self.workspaces.iter().copied())
    }

    /// Load a dependency
    pub async fn load(&self, specifier: &str) -> Result<Exports> {
        self.load_with(specifier, IoMode::Async).await
    }

    /// Load a dependency without an async runtime
    pub fn load_sync(&self, specifier: &str) -> Result<Exports> {
        futures::executor::block_on(self.load_with(specifier, IoMode::Sync))
    }

    /// Load a dependency in the given mode
    pub fn load_with<'a>(&'a self, specifier: &'a str, mode: IoMode) -> BoxFuture<'a, Result<Exports>> {
        Box::pin(async move {
            let options = self.options();
            self.loader.load_with(specifier, &options, mode).await
        })
    }

    /// Resolve a dependency without loading it
    pub async fn resolve(&self, specifier: &str) -> Result<Resolved> {
        self.loader.resolve(specifier, &self.options()).await
    }

    /// The module this handle belongs to
    pub fn parent(&self) -> &Arc<ModuleRecord> {
        &self.parent
    }

    /// The loader behind this handle
    pub fn loader(&self) -> &Loader {
        &self.loader
    }
}

impl fmt::Debug for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("parent", &self.parent.filename())
            .finish()
    }
}

/// Executors keyed by file extension
pub struct ExecutorRegistry {
    by_extension: DashMap<String, Arc<dyn Executor>>,
    default: RwLock<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Registry whose default executor is [`ModScript`]
    pub fn new() -> Self {
        Self {
            by_extension: DashMap::new(),
            default: RwLock::new(Arc::new(ModScript)),
        }
    }

    /// Use `executor` for files ending in `extension`
    pub fn register(&self, extension: &str, executor: Arc<dyn Executor>) {
        let extension = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{extension}")
        };
        tracing::debug!(%extension, "Registered executor");
        self.by_extension.insert(extension, executor);
    }

    /// Stop using a dedicated executor for `extension`
    pub fn unregister(&self, extension: &str) -> bool {
        self.by_extension.remove(extension).is_some()
    }

    /// Replace the fallback executor
    pub fn set_default(&self, executor: Arc<dyn Executor>) {
        *self.default.write() = executor;
    }

    /// Executor for `path`: the longest registered extension that matches
    /// its file name, or the default
    pub fn for_path(&self, path: &Path) -> Arc<dyn Executor> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.by_extension
            .iter()
            .filter(|entry| name.ends_with(entry.key().as_str()))
            .max_by_key(|entry| entry.key().len())
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| self.default.read().clone())
    }

    /// Number of extension-specific executors
    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    /// Whether only the default executor is available
    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extensions: Vec<String> = self.by_extension.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ExecutorRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Executor for Fixed {
        async fn execute(&self, ctx: &ModuleContext, _source: &str, _mode: IoMode) -> Result<()> {
            ctx.record.set_exports(Exports::from(serde_json::json!(self.0)));
            Ok(())
        }
    }

    #[test]
    fn test_longest_extension_wins() {
        let registry = ExecutorRegistry::new();
        registry.register("js", Arc::new(Fixed("js")));
        registry.register(".test.js", Arc::new(Fixed("test")));
        assert_eq!(registry.len(), 2);

        let plain = registry.for_path(Path::new("/app/a.js"));
        let test = registry.for_path(Path::new("/app/a.test.js"));
        let other = registry.for_path(Path::new("/app/a.mod"));
        assert!(!Arc::ptr_eq(&plain, &test));
        assert!(!Arc::ptr_eq(&plain, &other));

        assert!(registry.unregister(".js"));
        assert!(!registry.unregister(".js"));
    }
}
