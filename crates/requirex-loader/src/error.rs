// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, reading or evaluating modules.
///
/// The type is `Clone` so a single failure can be handed to every task
/// waiting on the same in-flight read or evaluation.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Specifier could not be resolved after exhausting every search path
    #[error("Cannot find module '{specifier}' from '{}'", basedir.display())]
    ModuleNotFound {
        /// Module specifier
        specifier: String,
        /// Directory the search started from
        basedir: PathBuf,
    },

    /// Specifier is empty or otherwise unusable
    #[error("Invalid module specifier: '{0}'")]
    InvalidSpecifier(String),

    /// File system error other than "not found"
    #[error("File system error at '{}': {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Package manifest could not be parsed
    #[error("Invalid package manifest '{}': {source}", path.display())]
    Manifest {
        /// Manifest path
        path: PathBuf,
        /// Parse error
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// JSON module could not be parsed
    #[error("Unexpected JSON in '{}': {source}", path.display())]
    Json {
        /// Module path
        path: PathBuf,
        /// Parse error
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Module source threw while executing
    #[error("Error evaluating '{}': {message}", path.display())]
    Evaluation {
        /// Module path
        path: PathBuf,
        /// Error message raised by the module
        message: String,
    },

    /// Module evaluation exceeded its time budget
    #[error("Evaluation of '{}' timed out after {}ms", path.display(), budget.as_millis())]
    Timeout {
        /// Module path
        path: PathBuf,
        /// Configured budget
        budget: Duration,
    },

    /// Native library could not be loaded
    #[error("Cannot load native module '{}': {message}", path.display())]
    Native {
        /// Library path
        path: PathBuf,
        /// Loader message
        message: String,
    },

    /// Invalid loader or resolver options
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl LoaderError {
    /// Create a module not found error
    pub fn module_not_found(specifier: impl Into<String>, basedir: impl Into<PathBuf>) -> Self {
        Self::ModuleNotFound {
            specifier: specifier.into(),
            basedir: basedir.into(),
        }
    }

    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this is a resolution miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. })
    }

    /// Whether the error was raised while evaluating a module.
    ///
    /// Timeouts, malformed JSON modules and native load failures count as
    /// evaluation errors.
    pub fn is_evaluation(&self) -> bool {
        matches!(
            self,
            Self::Evaluation { .. } | Self::Timeout { .. } | Self::Json { .. } | Self::Native { .. }
        )
    }

    /// Whether the error is transient and must not be cached
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
