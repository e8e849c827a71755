// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader facade: `require` in its awaitable, callback, synchronous and
//! fallback forms

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::events::{LoaderEvent, LoaderEvents};
use crate::fs::{ContentLoader, IoMode, ProbeCache};
use crate::module_system::cache::ModuleCache;
use crate::module_system::core::CoreModules;
use crate::module_system::evaluator::Evaluator;
use crate::module_system::executor::{ExecutorRegistry, Require};
use crate::module_system::native::is_native;
use crate::module_system::record::{ModuleRecord, ModuleState};
use crate::module_system::resolve_cache::ResolveCache;
use crate::module_system::resolver::{ResolveOptions, Resolved, Resolver};
use crate::module_system::workspace::WorkspaceRegistry;
use crate::value::Exports;
use futures::future::{BoxFuture, FutureExt, try_join_all};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::task::JoinHandle;

static GLOBAL: OnceLock<Loader> = OnceLock::new();

/// Resolves, reads, evaluates and caches modules
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    config: LoaderConfig,
    probe: Arc<ProbeCache>,
    resolve_cache: Arc<ResolveCache>,
    resolver: Resolver,
    content: ContentLoader,
    modules: Arc<ModuleCache>,
    executors: Arc<ExecutorRegistry>,
    workspaces: Arc<WorkspaceRegistry>,
    events: Arc<LoaderEvents>,
    core: CoreModules,
    evaluator: Evaluator,
}

impl Loader {
    /// Create a loader with its own caches
    pub fn new(config: LoaderConfig) -> Self {
        let probe = Arc::new(ProbeCache::new());
        let resolve_cache = Arc::new(ResolveCache::new());
        let resolver = Resolver::new(&config, Arc::clone(&probe), Arc::clone(&resolve_cache));
        let modules = Arc::new(if config.link_aware_cache {
            ModuleCache::link_aware()
        } else {
            ModuleCache::new()
        });
        let executors = Arc::new(ExecutorRegistry::new());
        let workspaces = Arc::new(WorkspaceRegistry::new());
        let events = Arc::new(LoaderEvents::new());
        let evaluator = Evaluator::new(
            Arc::clone(&executors),
            Arc::clone(&workspaces),
            Arc::clone(&events),
            Arc::clone(&modules),
            config.evaluation_timeout(),
        );
        let content = ContentLoader::new(config.load_simultaneously);

        Self {
            inner: Arc::new(LoaderInner {
                config,
                probe,
                resolve_cache,
                resolver,
                content,
                modules,
                executors,
                workspaces,
                events,
                core: CoreModules::new(),
                evaluator,
            }),
        }
    }

    /// Process-wide loader configured from `requirex.toml` and the
    /// environment, created on first use
    pub fn global() -> &'static Loader {
        GLOBAL.get_or_init(|| {
            let config = LoaderConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid loader configuration, using defaults");
                LoaderConfig::default()
            });
            Loader::new(config)
        })
    }

    /// Load a module relative to the working directory
    pub async fn require(&self, specifier: &str) -> Result<Exports> {
        self.require_with(&ResolveOptions::default(), specifier).await
    }

    /// Load a module with explicit options
    pub async fn require_with(&self, options: &ResolveOptions, specifier: &str) -> Result<Exports> {
        self.load_with(specifier, options, IoMode::Async).await
    }

    /// Load several modules concurrently. Results follow input order; the
    /// first failure fails the batch.
    pub async fn require_all<S: AsRef<str>>(
        &self,
        options: &ResolveOptions,
        specifiers: &[S],
    ) -> Result<Vec<Exports>> {
        try_join_all(
            specifiers
                .iter()
                .map(|specifier| self.load_with(specifier.as_ref(), options, IoMode::Async)),
        )
        .await
    }

    /// Load several modules on a spawned task and hand the outcome to
    /// `callback`
    pub fn require_callback<F>(
        &self,
        options: ResolveOptions,
        specifiers: Vec<String>,
        callback: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<Exports>>) + Send + 'static,
    {
        let loader = self.clone();
        tokio::spawn(async move {
            let outcome = loader.require_all(&options, specifiers.as_slice()).await;
            callback(outcome);
        })
    }

    /// Resolve asynchronously, then evaluate through the synchronous path
    pub async fn require_sync_with(
        &self,
        options: &ResolveOptions,
        specifier: &str,
    ) -> Result<Exports> {
        let resolved = self
            .inner
            .resolver
            .resolve_with(specifier, options, IoMode::Async)
            .await?;
        tokio::task::yield_now().await;
        self.load_resolved(resolved, options, IoMode::Sync).await
    }

    /// Batched form of [`Loader::require_sync_with`]: resolution runs
    /// concurrently, evaluation in input order
    pub async fn require_sync_all<S: AsRef<str>>(
        &self,
        options: &ResolveOptions,
        specifiers: &[S],
    ) -> Result<Vec<Exports>> {
        let resolved = try_join_all(specifiers.iter().map(|specifier| {
            self.inner
                .resolver
                .resolve_with(specifier.as_ref(), options, IoMode::Async)
        }))
        .await?;
        tokio::task::yield_now().await;

        let mut exports = Vec::with_capacity(resolved.len());
        for resolved in resolved {
            exports.push(self.load_resolved(resolved, options, IoMode::Sync).await?);
        }
        Ok(exports)
    }

    /// Fully blocking load; needs no async runtime
    pub fn load_sync(&self, options: &ResolveOptions, specifier: &str) -> Result<Exports> {
        futures::executor::block_on(self.load_with(specifier, options, IoMode::Sync))
    }

    /// Return the exports of the first specifier that loads, or `default`
    pub async fn try_module<S: AsRef<str>>(&self, specifiers: &[S], default: Exports) -> Exports {
        self.try_module_with(&ResolveOptions::default(), specifiers, default)
            .await
    }

    /// [`Loader::try_module`] with explicit options
    pub async fn try_module_with<S: AsRef<str>>(
        &self,
        options: &ResolveOptions,
        specifiers: &[S],
        default: Exports,
    ) -> Exports {
        for specifier in specifiers {
            let specifier = specifier.as_ref();
            let outcome = if self.inner.config.use_sync_require {
                self.require_sync_with(options, specifier).await
            } else {
                self.require_with(options, specifier).await
            };
            match outcome {
                Ok(exports) => return exports,
                Err(error) => tracing::debug!(specifier, %error, "Candidate failed"),
            }
        }
        default
    }

    /// Resolve a specifier without loading it
    pub async fn resolve(&self, specifier: &str, options: &ResolveOptions) -> Result<Resolved> {
        self.inner.resolver.resolve(specifier, options).await
    }

    /// Blocking form of [`Loader::resolve`]
    pub fn resolve_sync(&self, specifier: &str, options: &ResolveOptions) -> Result<Resolved> {
        self.inner.resolver.resolve_sync(specifier, options)
    }

    /// A resolver sharing this loader's caches with `options` as its
    /// defaults
    pub fn get_resolver(&self, options: &ResolveOptions) -> Result<Resolver> {
        self.inner.resolver.derive(options)
    }

    /// Forget a module everywhere: module, content, probe and resolution
    /// caches. Returns whether a module record was removed.
    pub fn invalidate(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let removed = self.inner.modules.remove(path).is_some();
        self.inner.content.invalidate(path);
        self.inner.probe.invalidate(path);
        self.inner.resolve_cache.invalidate_path(path);
        tracing::debug!(path = %path.display(), removed, "Invalidated module");
        removed
    }

    /// Empty every cache
    pub fn clear_caches(&self) {
        self.inner.modules.clear();
        self.inner.content.clear();
        self.inner.probe.clear();
        self.inner.resolve_cache.clear();
        tracing::debug!("Cleared loader caches");
    }

    /// Loader configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// The loader's own resolver
    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// Filesystem probe cache
    pub fn probe(&self) -> &ProbeCache {
        &self.inner.probe
    }

    /// Resolution cache
    pub fn resolve_cache(&self) -> &ResolveCache {
        &self.inner.resolve_cache
    }

    /// Source content cache
    pub fn content(&self) -> &ContentLoader {
        &self.inner.content
    }

    /// Module cache
    pub fn modules(&self) -> &ModuleCache {
        &self.inner.modules
    }

    /// Executors by extension
    pub fn executors(&self) -> &ExecutorRegistry {
        &self.inner.executors
    }

    /// Lifecycle listeners
    pub fn events(&self) -> &LoaderEvents {
        &self.inner.events
    }

    /// Workspace scopes
    pub fn workspaces(&self) -> &WorkspaceRegistry {
        &self.inner.workspaces
    }

    /// Host core module table
    pub fn core_modules(&self) -> &CoreModules {
        &self.inner.core
    }

    /// Module evaluator
    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    pub(crate) fn load_with<'a>(
        &'a self,
        specifier: &'a str,
        options: &'a ResolveOptions,
        mode: IoMode,
    ) -> BoxFuture<'a, Result<Exports>> {
        async move {
            let resolved = self
                .inner
                .resolver
                .resolve_with(specifier, options, mode)
                .await?;
            self.load_resolved(resolved, options, mode).await
        }
        .boxed()
    }

    async fn load_resolved(
        &self,
        resolved: Resolved,
        options: &ResolveOptions,
        mode: IoMode,
    ) -> Result<Exports> {
        match resolved {
            Resolved::Core(name) => Ok(self.inner.core.load(&name)),
            Resolved::Path(path) => self.load_path(path, options, mode).await,
        }
    }

    async fn load_path(
        &self,
        path: PathBuf,
        options: &ResolveOptions,
        mode: IoMode,
    ) -> Result<Exports> {
        let inner = &self.inner;
        let key = if inner.modules.is_link_aware() {
            let meta = inner.probe.stat_with(&path, mode).await?;
            inner.modules.key_for(&path, meta.as_ref())
        } else {
            path
        };

        let parent = options.parent.as_ref();
        let (record, created) = inner.modules.get_or_insert_with(&key, || {
            ModuleRecord::new(key.clone(), parent, options.workspaces.clone())
        });
        if !created {
            return self.attach(&record, parent, mode).await;
        }

        tracing::debug!(module = %key.display(), sync = mode == IoMode::Sync, "Loading module");
        if let Some(parent) = parent {
            parent.begin_awaiting(&key);
        }
        let _in_flight = InFlight {
            modules: &inner.modules,
            record: Arc::clone(&record),
            parent: parent.cloned(),
        };

        self.instantiate(&record, options, mode)
            .await
            .map(|record| record.exports())
    }

    /// Read and evaluate a freshly inserted record
    async fn instantiate(
        &self,
        record: &Arc<ModuleRecord>,
        options: &ResolveOptions,
        mode: IoMode,
    ) -> Result<Arc<ModuleRecord>> {
        let text: Arc<str> = if is_native(record.filename()) {
            Arc::from("")
        } else {
            match self.read(record, mode).await {
                Ok(text) => text,
                Err(error) => {
                    record.set_state(ModuleState::Failed(error.clone()));
                    self.inner.modules.evict(record);
                    return Err(error);
                }
            }
        };

        let require = Require::new(self.clone(), Arc::clone(record), options.workspaces.clone());
        self.inner
            .evaluator
            .evaluate_with(Arc::clone(record), text, require, mode)
            .await
    }

    async fn read(&self, record: &ModuleRecord, mode: IoMode) -> Result<Arc<str>> {
        let target = record.filename().to_path_buf();
        let source = record.parent().map(|p| p.filename().to_path_buf());
        self.inner.events.emit(&LoaderEvent::Load {
            target: target.clone(),
            source: source.clone(),
            sync: mode == IoMode::Sync,
        });

        let started = Instant::now();
        let text = match mode {
            IoMode::Async => self.inner.content.load(&target).await?,
            IoMode::Sync => self.inner.content.load_sync(&target)?,
        };

        self.inner.events.emit(&LoaderEvent::Loaded {
            target,
            source,
            duration: started.elapsed(),
            size: text.len(),
        });
        Ok(text)
    }

    /// Join a record someone else is loading
    async fn attach(
        &self,
        record: &Arc<ModuleRecord>,
        requester: Option<&Arc<ModuleRecord>>,
        mode: IoMode,
    ) -> Result<Exports> {
        if let Some(outcome) = record.outcome() {
            return outcome;
        }

        match (mode, requester) {
            (_, None) => record.wait().await,
            // A nested load inside a blocking evaluation cannot wait; it sees the exports so far
            (IoMode::Sync, Some(_)) => {
                tracing::debug!(module = %record.filename().display(), "Using partial exports of in-flight module");
                Ok(record.exports())
            }
            (IoMode::Async, Some(requester)) => {
                requester.begin_awaiting(record.filename());
                let outcome = if self.waits_on(record, requester.filename()) {
                    tracing::debug!(
                        module = %record.filename().display(),
                        requester = %requester.filename().display(),
                        "Dependency cycle, using partial exports"
                    );
                    Ok(record.exports())
                } else {
                    record.wait().await
                };
                requester.end_awaiting(record.filename());
                outcome
            }
        }
    }

    /// Whether `start`, or anything it transitively waits on, is `target`
    fn waits_on(&self, start: &ModuleRecord, target: &Path) -> bool {
        let mut pending = vec![start.filename().to_path_buf()];
        let mut seen = HashSet::new();
        while let Some(path) = pending.pop() {
            if path == target {
                return true;
            }
            if !seen.insert(path.clone()) {
                continue;
            }
            if let Some(record) = self.inner.modules.get(&path) {
                pending.extend(record.awaiting());
            }
        }
        false
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("modules", &self.inner.modules.len())
            .field("resolutions", &self.inner.resolve_cache.len())
            .field("content", &self.inner.content)
            .finish()
    }
}

/// Settles a record whose load was dropped before finishing, so waiters
/// are not left hanging, and clears the parent's wait marker
struct InFlight<'a> {
    modules: &'a ModuleCache,
    record: Arc<ModuleRecord>,
    parent: Option<Arc<ModuleRecord>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            parent.end_awaiting(self.record.filename());
        }
        if !self.record.is_settled() {
            let error = LoaderError::evaluation(self.record.filename(), "module load was cancelled");
            self.record.set_state(ModuleState::Failed(error));
            self.modules.evict(&self.record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_core_module_marker_and_registration() {
        let loader = Loader::default();
        assert!(matches!(loader.require("fs").await.unwrap(), Exports::Core(name) if name == "fs"));

        loader
            .core_modules()
            .register("os", Exports::from(json!({ "eol": "\n" })));
        assert_eq!(
            loader.require("node:os").await.unwrap().get("eol"),
            Some(&json!("\n"))
        );
    }

    #[tokio::test]
    async fn test_self_require_returns_partial_exports() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("self.js");
        std::fs::write(&file, "exports.before = 1\nconst me = require(\"./self\")\nexports.seen = me.before\n").unwrap();

        let loader = Loader::default();
        let options = ResolveOptions::new().basedir(dir.path());
        let exports = loader.require_with(&options, "./self").await.unwrap();
        assert_eq!(exports.get("seen"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_cancelled_load_is_evicted() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("slow.js"), "sleep(5000)\nexports.done = true\n").unwrap();

        let loader = Loader::default();
        let options = ResolveOptions::new().basedir(&root);
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            loader.require_with(&options, "./slow"),
        )
        .await;
        assert!(attempt.is_err());
        assert!(!loader.modules().contains(&root.join("slow.js")));
    }
}
