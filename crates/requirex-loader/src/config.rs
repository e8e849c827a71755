// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration
//!
//! Defaults can be overridden from a `requirex.toml` file in the working
//! directory and then from `REQUIREX_*` environment variables.

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "requirex.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "REQUIREX_";

/// Core modules recognised by default
pub const DEFAULT_CORE_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Configuration shared by every resolver, cache and evaluator of a loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoaderConfig {
    /// Extensions probed during resolution, in precedence order
    pub extensions: Vec<String>,

    /// Name of the dependency directory searched by the ancestor walk
    pub module_directory: String,

    /// Name of the per-directory package manifest
    pub manifest: String,

    /// Identifiers resolved through the host instead of the file tree
    pub core_modules: Vec<String>,

    /// Keep symlinked paths instead of canonicalizing resolved files
    pub preserve_symlinks: bool,

    /// Wall-clock budget for a single module evaluation, in milliseconds
    pub evaluation_timeout_ms: u64,

    /// Maximum number of source reads in flight at once
    pub load_simultaneously: usize,

    /// Alias hard-linked files to a single module cache entry
    pub link_aware_cache: bool,

    /// Make `try_module` and directory imports evaluate through the
    /// synchronous loader path
    pub use_sync_require: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_string(), ".json".to_string(), ".node".to_string()],
            module_directory: "node_modules".to_string(),
            manifest: "package.json".to_string(),
            core_modules: DEFAULT_CORE_MODULES.iter().map(|s| s.to_string()).collect(),
            preserve_symlinks: false,
            evaluation_timeout_ms: 30_000,
            load_simultaneously: 10,
            link_aware_cache: false,
            use_sync_require: false,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from the working directory and the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_dir(Path::new("."))?;
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Load configuration from `requirex.toml` in `dir`, if present.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| LoaderError::io(&path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            LoaderError::InvalidOptions(format!("{}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded loader configuration");
        config.validated()
    }

    /// Apply `REQUIREX_*` overrides from an iterator of variables.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                let config_key = config_key.to_lowercase().replace('_', "-");
                self.set(&config_key, &value);
            }
        }
    }

    /// Set a configuration value from its string form.
    ///
    /// Unknown keys and unparsable values are ignored with a warning.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "extensions" => {
                let extensions = split_list(value);
                if !extensions.is_empty() {
                    self.extensions = extensions;
                }
            }
            "module-directory" => self.module_directory = value.to_string(),
            "manifest" => self.manifest = value.to_string(),
            "core-modules" => self.core_modules = split_list(value),
            "preserve-symlinks" => self.preserve_symlinks = value == "true",
            "evaluation-timeout-ms" => match value.parse() {
                Ok(ms) => self.evaluation_timeout_ms = ms,
                Err(_) => tracing::warn!(key, value, "Ignoring invalid timeout"),
            },
            "load-simultaneously" => match value.parse::<usize>() {
                Ok(n) if n > 0 => self.load_simultaneously = n,
                _ => tracing::warn!(key, value, "Ignoring invalid read limit"),
            },
            "link-aware-cache" => self.link_aware_cache = value == "true",
            "use-sync-require" => self.use_sync_require = value == "true",
            _ => tracing::warn!(key, "Ignoring unknown configuration key"),
        }
    }

    /// Evaluation budget as a duration
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    fn validated(self) -> Result<Self> {
        if self.extensions.is_empty() {
            return Err(LoaderError::InvalidOptions(
                "extensions must not be empty".to_string(),
            ));
        }
        if self.load_simultaneously == 0 {
            return Err(LoaderError::InvalidOptions(
                "load-simultaneously must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
