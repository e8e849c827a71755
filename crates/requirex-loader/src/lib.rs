// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # requirex-loader
//!
//! An asynchronous module loader that stays interchangeable with a
//! synchronous one. It provides:
//!
//! - Specifier resolution (directory-tree search, extension probing,
//!   package manifests, core modules)
//! - Coherent caches for probes, resolutions, source text and modules
//! - Evaluation in isolated or workspace-shared scopes, with lifecycle
//!   events and an evaluation budget
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use requirex_loader::{Loader, ResolveOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loader = Loader::global();
//!     let options = ResolveOptions::new().basedir("./app");
//!     let config = loader.require_with(&options, "./config.json").await?;
//!     println!("{}", config.to_json());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod module_system;
pub mod value;

// Re-exports
pub use config::LoaderConfig;
pub use error::{LoaderError, Result};
pub use events::{Disposition, EventKind, ListenerId, LoaderEvent, LoaderEvents};
pub use fs::{ContentLoader, IoMode, ProbeCache};
pub use module_system::{
    ImportOptions, Loader, ModuleRecord, ModuleState, ResolveOptions, Resolved, Resolver,
    WorkspaceId,
};
pub use value::Exports;

/// Version of the loader
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
