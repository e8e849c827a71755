// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module system
//!
//! ## Resolution
//! - Core modules (optionally `node:`-prefixed)
//! - Relative and absolute paths with extension probing
//! - Directories through the package manifest `main` or `index`
//! - Bare names through extra search paths and the ancestor walk
//!
//! ## Loading
//! - At most one evaluation per resolved path, even under concurrency
//! - Dependency cycles see the partial exports of the in-flight module
//! - JSON, native libraries and pluggable executors
//! - Shared workspace scopes

mod cache;
mod core;
mod evaluator;
mod executor;
mod import;
mod native;
mod record;
mod require;
mod resolve_cache;
mod resolver;
mod script;
mod workspace;

pub use cache::ModuleCache;
pub use core::CoreModules;
pub use evaluator::Evaluator;
pub use executor::{Executor, ExecutorRegistry, ModuleContext, Require};
pub use import::{ImportOptions, OnLoad};
pub use native::{NATIVE_EXTENSIONS, NativeModule, is_native};
pub use record::{ModuleRecord, ModuleState};
pub use require::Loader;
pub use resolve_cache::{ResolveCache, ResolveKey};
pub use resolver::{ResolutionContext, ResolveOptions, Resolved, Resolver};
pub use script::ModScript;
pub use workspace::{Bindings, IsolatedScope, WorkspaceId, WorkspaceRegistry};
