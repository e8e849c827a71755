// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bulk import of every module in a directory

use crate::error::Result;
use crate::module_system::require::Loader;
use crate::module_system::resolver::{ResolveOptions, absolutize, normalize_extensions};
use crate::module_system::workspace::Bindings;
use crate::value::Exports;
use futures::future::try_join_all;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback invoked with each imported module, in directory order
pub type OnLoad = Arc<dyn Fn(&Path, &Exports) + Send + Sync>;

/// Options for [`Loader::import_directory`]
#[derive(Clone, Default)]
pub struct ImportOptions {
    /// Extensions of files to import; the loader's extensions when `None`
    pub extensions: Option<Vec<String>>,
    /// Map the imports are added to
    pub imports: Bindings,
    /// Merge object exports into `imports` instead of keying by file name
    pub merge: bool,
    /// Called for each module after it loads
    pub onload: Option<OnLoad>,
    /// Only import these files (by name, with or without extension)
    pub includes: Vec<String>,
    /// Skip these files (by name, with or without extension)
    pub excludes: Vec<String>,
    /// File doing the import; never imported itself
    pub caller: Option<PathBuf>,
    /// Options used to load each file
    pub resolve: ResolveOptions,
}

impl ImportOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Import files with these extensions
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    /// Add to an existing map
    pub fn imports(mut self, imports: Bindings) -> Self {
        self.imports = imports;
        self
    }

    /// Merge object exports into the map
    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// Call `onload` for every imported module
    pub fn onload<F>(mut self, onload: F) -> Self
    where
        F: Fn(&Path, &Exports) + Send + Sync + 'static,
    {
        self.onload = Some(Arc::new(onload));
        self
    }

    /// Restrict the import to `name`
    pub fn include(mut self, name: impl Into<String>) -> Self {
        self.includes.push(name.into());
        self
    }

    /// Skip `name`
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excludes.push(name.into());
        self
    }

    /// Never import `caller`
    pub fn caller(mut self, caller: impl Into<PathBuf>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Load each file with `resolve`
    pub fn resolve(mut self, resolve: ResolveOptions) -> Self {
        self.resolve = resolve;
        self
    }
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("extensions", &self.extensions)
            .field("merge", &self.merge)
            .field("includes", &self.includes)
            .field("excludes", &self.excludes)
            .field("caller", &self.caller)
            .finish()
    }
}

/// A directory entry selected for import
struct Candidate {
    path: PathBuf,
    /// File name without the matched extension
    stem: String,
}

impl Loader {
    /// Load every matching file in `dir` and collect the exports.
    ///
    /// Files load concurrently; `onload` and the merge run in directory
    /// order. A missing directory yields the initial map unchanged.
    pub async fn import_directory(&self, dir: impl AsRef<Path>, options: ImportOptions) -> Result<Bindings> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let dir = absolutize(dir.as_ref(), &cwd);
        let ImportOptions {
            extensions,
            mut imports,
            merge,
            onload,
            includes,
            excludes,
            caller,
            resolve,
        } = options;

        let Some(names) = self.probe().read_dir(&dir).await? else {
            tracing::debug!(dir = %dir.display(), "Import directory does not exist");
            return Ok(imports);
        };
        let extensions = match extensions {
            Some(extensions) => normalize_extensions(&extensions),
            None => normalize_extensions(&self.config().extensions),
        };
        let caller = caller.map(|c| absolutize(&c, &cwd));

        let mut candidates = Vec::new();
        for name in names.iter() {
            let Some(ext) = extensions.iter().find(|ext| name.ends_with(ext.as_str())) else {
                continue;
            };
            let path = dir.join(name);
            if caller.as_deref() == Some(path.as_path()) || !self.probe().is_file(&path).await? {
                continue;
            }
            let stem = name[..name.len() - ext.len()].to_string();
            let matches = |list: &[String]| list.iter().any(|n| n == name || *n == stem);
            if (!includes.is_empty() && !matches(&includes)) || matches(&excludes) {
                continue;
            }
            candidates.push(Candidate { path, stem });
        }

        let use_sync = self.config().use_sync_require;
        let loaded = try_join_all(candidates.iter().map(|candidate| {
            let specifier = candidate.path.to_string_lossy().into_owned();
            let resolve = &resolve;
            async move {
                if use_sync {
                    self.require_sync_with(resolve, &specifier).await
                } else {
                    self.require_with(resolve, &specifier).await
                }
            }
        }))
        .await?;

        for (candidate, exports) in candidates.iter().zip(loaded) {
            if let Some(onload) = &onload {
                onload(&candidate.path, &exports);
            }
            match exports.to_json() {
                Value::Object(map) if merge => imports.extend(map),
                value => {
                    imports.insert(candidate.stem.clone(), value);
                }
            }
        }

        tracing::debug!(dir = %dir.display(), count = imports.len(), "Imported directory");
        Ok(imports)
    }
}
