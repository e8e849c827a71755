// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution
//!
//! Relative and absolute specifiers are probed as a file (literal name, then
//! each extension appended) and then as a directory (manifest `main`, then
//! `index` plus each extension). Bare specifiers are looked up in the extra
//! search paths and then in the module directory of every ancestor of the
//! base directory.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::fs::{IoMode, ProbeCache};
use crate::module_system::record::ModuleRecord;
use crate::module_system::resolve_cache::{ResolveCache, ResolveKey};
use crate::module_system::workspace::WorkspaceId;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Result of module resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Core module provided by the host
    Core(String),
    /// Absolute path of the module file
    Path(PathBuf),
}

impl Resolved {
    /// Resolved path, if this is not a core module
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Core(_) => None,
        }
    }
}

impl std::fmt::Display for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(name) => write!(f, "{name}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Per-call overrides for resolution and loading
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Directory relative specifiers are resolved from
    pub basedir: Option<PathBuf>,
    /// Extensions to probe instead of the resolver's defaults
    pub extensions: Option<Vec<String>>,
    /// Dependency directory name instead of the default
    pub module_directory: Option<String>,
    /// Keep symlinked paths instead of canonicalizing
    pub preserve_symlinks: Option<bool>,
    /// Extra roots searched for bare specifiers before the ancestor walk
    pub paths: Vec<PathBuf>,
    /// Requiring module; its directory is the default base directory
    pub parent: Option<Arc<ModuleRecord>>,
    /// Workspaces whose shared scope the loaded modules are evaluated in
    pub workspaces: Vec<WorkspaceId>,
}

impl ResolveOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve from `basedir`
    pub fn basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    /// Probe these extensions, in order
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    /// Search `name` directories instead of the default
    pub fn module_directory(mut self, name: impl Into<String>) -> Self {
        self.module_directory = Some(name.into());
        self
    }

    /// Keep or resolve symlinks
    pub fn preserve_symlinks(mut self, preserve: bool) -> Self {
        self.preserve_symlinks = Some(preserve);
        self
    }

    /// Add an extra search root for bare specifiers
    pub fn path(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths.push(root.into());
        self
    }

    /// Load on behalf of `parent`
    pub fn parent(mut self, parent: Arc<ModuleRecord>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Evaluate in these workspaces
    pub fn workspaces(mut self, ids: impl IntoIterator<Item = WorkspaceId>) -> Self {
        self.workspaces = ids.into_iter().collect();
        self
    }
}

/// Fully determined inputs of one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    /// Absolute directory relative specifiers start from
    pub base_directory: PathBuf,
    /// Dependency directory name searched by the ancestor walk
    pub module_directory: String,
    /// Extensions probed, in order, unique and non-empty
    pub extensions: Vec<String>,
    /// Extra roots for bare specifiers
    pub paths: Vec<PathBuf>,
    /// Keep symlinked paths
    pub preserve_symlinks: bool,
    /// Package manifest file name
    pub manifest: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    main: Option<String>,
}

/// Module resolver implementing the directory-tree search
#[derive(Debug)]
pub struct Resolver {
    /// Defaults overlaid by [`ResolveOptions`]; `base_directory` is the
    /// fallback when neither a basedir nor a parent is given
    defaults: RwLock<ResolutionContext>,
    core_modules: Arc<HashSet<String>>,
    probe: Arc<ProbeCache>,
    cache: Arc<ResolveCache>,
}

impl Resolver {
    /// Create a resolver from loader configuration and shared caches
    pub fn new(config: &LoaderConfig, probe: Arc<ProbeCache>, cache: Arc<ResolveCache>) -> Self {
        let base_directory = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            defaults: RwLock::new(ResolutionContext {
                base_directory,
                module_directory: config.module_directory.clone(),
                extensions: normalize_extensions(&config.extensions),
                paths: Vec::new(),
                preserve_symlinks: config.preserve_symlinks,
                manifest: config.manifest.clone(),
            }),
            core_modules: Arc::new(config.core_modules.iter().cloned().collect()),
            probe,
            cache,
        }
    }

    /// A resolver sharing this one's caches whose defaults are overlaid with
    /// `options`. Later extension changes on either do not affect the other.
    pub fn derive(&self, options: &ResolveOptions) -> Result<Self> {
        let defaults = self.context(options)?;
        Ok(Self {
            defaults: RwLock::new(defaults),
            core_modules: Arc::clone(&self.core_modules),
            probe: Arc::clone(&self.probe),
            cache: Arc::clone(&self.cache),
        })
    }

    /// Check if a module is a core module
    pub fn is_core_module(&self, name: &str) -> bool {
        name.starts_with("node:") || self.core_modules.contains(name)
    }

    /// Current defaults
    pub fn state(&self) -> ResolutionContext {
        self.defaults.read().clone()
    }

    /// Default extensions, in probe order
    pub fn extensions(&self) -> Vec<String> {
        self.defaults.read().extensions.clone()
    }

    /// Append extensions to this resolver's defaults
    pub fn add_extensions<I, S>(&self, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut defaults = self.defaults.write();
        for ext in extensions {
            let ext = dotted(ext.as_ref());
            if !defaults.extensions.contains(&ext) {
                defaults.extensions.push(ext);
            }
        }
    }

    /// Remove extensions from this resolver's defaults. Fails, leaving the
    /// defaults unchanged, if no extension would remain.
    pub fn remove_extensions<I, S>(&self, extensions: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed: Vec<String> = extensions.into_iter().map(|e| dotted(e.as_ref())).collect();
        let mut defaults = self.defaults.write();
        let remaining: Vec<String> = defaults
            .extensions
            .iter()
            .filter(|ext| !removed.contains(ext))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Err(LoaderError::InvalidOptions(
                "cannot remove every extension".to_string(),
            ));
        }
        defaults.extensions = remaining;
        Ok(())
    }

    /// Build the resolution context for `options`
    pub fn context(&self, options: &ResolveOptions) -> Result<ResolutionContext> {
        let mut context = self.state();

        if let Some(basedir) = &options.basedir {
            context.base_directory = absolutize(basedir, &context.base_directory);
        } else if let Some(parent) = &options.parent {
            context.base_directory = parent.dirname().to_path_buf();
        }
        if let Some(extensions) = &options.extensions {
            if extensions.is_empty() {
                return Err(LoaderError::InvalidOptions(
                    "extensions must not be empty".to_string(),
                ));
            }
            context.extensions = normalize_extensions(extensions);
        }
        if let Some(module_directory) = &options.module_directory {
            context.module_directory = module_directory.clone();
        }
        if let Some(preserve) = options.preserve_symlinks {
            context.preserve_symlinks = preserve;
        }
        if !options.paths.is_empty() {
            let base = context.base_directory.clone();
            context.paths = options.paths.iter().map(|p| absolutize(p, &base)).collect();
        }

        Ok(context)
    }

    /// Resolve a module specifier
    pub async fn resolve(&self, specifier: &str, options: &ResolveOptions) -> Result<Resolved> {
        self.resolve_with(specifier, options, IoMode::Async).await
    }

    /// Blocking form of [`Resolver::resolve`]
    pub fn resolve_sync(&self, specifier: &str, options: &ResolveOptions) -> Result<Resolved> {
        futures::executor::block_on(self.resolve_with(specifier, options, IoMode::Sync))
    }

    pub(crate) async fn resolve_with(
        &self,
        specifier: &str,
        options: &ResolveOptions,
        mode: IoMode,
    ) -> Result<Resolved> {
        if specifier.is_empty() {
            return Err(LoaderError::InvalidSpecifier(specifier.to_string()));
        }
        if self.is_core_module(specifier) {
            let name = specifier.strip_prefix("node:").unwrap_or(specifier);
            return Ok(Resolved::Core(name.to_string()));
        }

        let context = self.context(options)?;
        let key = ResolveKey::new(specifier, &context);
        if let Some(cached) = self.cache.get(&key) {
            tracing::trace!(specifier, "Resolution cache hit");
            return cached;
        }

        let outcome = self.resolve_uncached(specifier, &context, mode).await;
        match &outcome {
            Ok(resolved) => tracing::debug!(specifier, %resolved, "Resolved module"),
            Err(err) => tracing::debug!(specifier, error = %err, "Resolution failed"),
        }
        self.cache.put(key, &outcome);
        outcome
    }

    async fn resolve_uncached(
        &self,
        specifier: &str,
        context: &ResolutionContext,
        mode: IoMode,
    ) -> Result<Resolved> {
        let found = if is_path_specifier(specifier) {
            let target = normalize(&context.base_directory.join(specifier));
            self.load_as_file_or_directory(target, context, mode).await?
        } else {
            self.load_from_search_paths(specifier, context, mode).await?
        };

        let Some(path) = found else {
            return Err(LoaderError::module_not_found(
                specifier,
                &context.base_directory,
            ));
        };

        if context.preserve_symlinks {
            Ok(Resolved::Path(path))
        } else {
            Ok(Resolved::Path(self.probe.canonicalize_with(&path, mode).await?))
        }
    }

    async fn load_from_search_paths(
        &self,
        specifier: &str,
        context: &ResolutionContext,
        mode: IoMode,
    ) -> Result<Option<PathBuf>> {
        for root in &context.paths {
            let candidate = normalize(&root.join(specifier));
            if let Some(found) = self.load_as_file_or_directory(candidate, context, mode).await? {
                return Ok(Some(found));
            }
        }

        for ancestor in context.base_directory.ancestors() {
            if ancestor
                .file_name()
                .is_some_and(|name| name == context.module_directory.as_str())
            {
                continue;
            }
            let candidate = normalize(
                &ancestor
                    .join(&context.module_directory)
                    .join(specifier),
            );
            if let Some(found) = self.load_as_file_or_directory(candidate, context, mode).await? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    fn load_as_file_or_directory<'a>(
        &'a self,
        path: PathBuf,
        context: &'a ResolutionContext,
        mode: IoMode,
    ) -> BoxFuture<'a, Result<Option<PathBuf>>> {
        async move {
            if let Some(file) = self.load_as_file(&path, context, mode).await? {
                return Ok(Some(file));
            }
            self.load_as_directory(&path, context, mode).await
        }
        .boxed()
    }

    async fn load_as_file(
        &self,
        path: &Path,
        context: &ResolutionContext,
        mode: IoMode,
    ) -> Result<Option<PathBuf>> {
        if self.probe.is_file_with(path, mode).await? {
            return Ok(Some(path.to_path_buf()));
        }
        for ext in &context.extensions {
            let candidate = with_suffix(path, ext);
            if self.probe.is_file_with(&candidate, mode).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn load_as_directory(
        &self,
        dir: &Path,
        context: &ResolutionContext,
        mode: IoMode,
    ) -> Result<Option<PathBuf>> {
        if !self.probe.is_dir_with(dir, mode).await? {
            return Ok(None);
        }

        let manifest_path = dir.join(&context.manifest);
        if self.probe.is_file_with(&manifest_path, mode).await? {
            let text = self.probe.read_text_with(&manifest_path, mode).await?;
            let manifest: Manifest =
                serde_json::from_str(&text).map_err(|e| LoaderError::Manifest {
                    path: manifest_path.clone(),
                    source: Arc::new(e),
                })?;

            if let Some(main) = manifest.main.filter(|m| !m.trim().is_empty()) {
                let target = normalize(&dir.join(main.trim()));
                // `"main": "."` points back at this directory
                if target != dir {
                    if let Some(found) = self.load_as_file_or_directory(target, context, mode).await? {
                        return Ok(Some(found));
                    }
                }
            }
        }

        for ext in &context.extensions {
            let index = dir.join(format!("index{ext}"));
            if self.probe.is_file_with(&index, mode).await? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

/// Whether the specifier names a path rather than a package
pub(crate) fn is_path_specifier(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || is_windows_absolute(specifier)
}

fn is_windows_absolute(specifier: &str) -> bool {
    let bytes = specifier.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// `path` with `suffix` appended to its file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn dotted(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

/// Dot-prefixed extensions, duplicates removed
pub(crate) fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let mut unique = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let ext = dotted(ext);
        if !unique.contains(&ext) {
            unique.push(ext);
        }
    }
    unique
}

/// Resolve `.` and `..` lexically
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

pub(crate) fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}
