// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module evaluation
//!
//! JSON modules are parsed, native modules are opened as dynamic libraries
//! and everything else runs through the executor registered for its
//! extension. The evaluator drives the record through its states, enforces
//! the evaluation budget and applies the failure policy.

use crate::error::{LoaderError, Result};
use crate::events::{Disposition, LoaderEvent, LoaderEvents};
use crate::fs::IoMode;
use crate::module_system::cache::ModuleCache;
use crate::module_system::executor::{ExecutorRegistry, ModuleContext, Require};
use crate::module_system::native::{NativeModule, is_native};
use crate::module_system::record::{ModuleRecord, ModuleState};
use crate::module_system::workspace::WorkspaceRegistry;
use crate::value::Exports;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Evaluates module source and settles module records
#[derive(Debug)]
pub struct Evaluator {
    executors: Arc<ExecutorRegistry>,
    workspaces: Arc<WorkspaceRegistry>,
    events: Arc<LoaderEvents>,
    modules: Arc<ModuleCache>,
    timeout: Duration,
}

impl Evaluator {
    /// Create an evaluator over shared registries and the module cache
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        workspaces: Arc<WorkspaceRegistry>,
        events: Arc<LoaderEvents>,
        modules: Arc<ModuleCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            executors,
            workspaces,
            events,
            modules,
            timeout,
        }
    }

    /// Evaluation budget per module
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate `text` as the source of `record`.
    ///
    /// On success the record is loaded and linked into its parent. On
    /// failure an `Error` event is emitted: if a listener ignores it the
    /// error becomes the record's exports and the record stays cached,
    /// otherwise the record fails, is evicted and the error is returned.
    pub async fn evaluate(
        &self,
        record: Arc<ModuleRecord>,
        text: Arc<str>,
        require: Require,
    ) -> Result<Arc<ModuleRecord>> {
        self.evaluate_with(record, text, require, IoMode::Async).await
    }

    /// Blocking form of [`Evaluator::evaluate`]. The budget is checked once
    /// execution returns since a running module cannot be interrupted.
    pub fn evaluate_sync(
        &self,
        record: Arc<ModuleRecord>,
        text: Arc<str>,
        require: Require,
    ) -> Result<Arc<ModuleRecord>> {
        futures::executor::block_on(self.evaluate_with(record, text, require, IoMode::Sync))
    }

    pub(crate) async fn evaluate_with(
        &self,
        record: Arc<ModuleRecord>,
        text: Arc<str>,
        require: Require,
        mode: IoMode,
    ) -> Result<Arc<ModuleRecord>> {
        let filename = record.filename().to_path_buf();
        let source = record.parent().map(|p| p.filename().to_path_buf());
        let sync = mode == IoMode::Sync;

        let scope = if record.workspaces().is_empty() {
            self.workspaces.private_scope()
        } else {
            self.workspaces.get(record.workspaces())
        };
        record.set_state(ModuleState::ScopeBuilt);

        self.events.emit(&LoaderEvent::Evaluate {
            target: filename.clone(),
            source: source.clone(),
            sync,
        });

        record.set_state(ModuleState::Executing);
        let started = Instant::now();
        let ctx = ModuleContext {
            record: Arc::clone(&record),
            scope,
            require,
            filename: filename.clone(),
            dirname: record.dirname().to_path_buf(),
        };
        let outcome = self.run(&ctx, &text, mode, started).await;
        let duration = started.elapsed();

        match outcome {
            Ok(()) => {
                record.set_state(ModuleState::Loaded);
                if let Some(parent) = record.parent() {
                    parent.add_child(&record);
                }
                tracing::debug!(
                    module = %filename.display(),
                    elapsed_ms = duration.as_millis() as u64,
                    sync,
                    "Evaluated module"
                );
                self.events.emit(&LoaderEvent::Evaluated {
                    target: filename,
                    source,
                    duration,
                    cache_size: self.modules.len(),
                    sync,
                });
                Ok(record)
            }
            Err(error) => {
                let disposition = self.events.emit(&LoaderEvent::Error {
                    target: filename.clone(),
                    source,
                    error: error.clone(),
                });

                if disposition == Disposition::Ignore {
                    tracing::debug!(module = %filename.display(), %error, "Keeping failed module as error value");
                    record.set_exports(Exports::Error(error));
                    record.set_state(ModuleState::Loaded);
                    if let Some(parent) = record.parent() {
                        parent.add_child(&record);
                    }
                    Ok(record)
                } else {
                    tracing::warn!(module = %filename.display(), %error, "Module evaluation failed");
                    record.set_state(ModuleState::Failed(error.clone()));
                    self.modules.evict(&record);
                    Err(error)
                }
            }
        }
    }

    async fn run(&self, ctx: &ModuleContext, text: &str, mode: IoMode, started: Instant) -> Result<()> {
        let path = ctx.filename.as_path();

        if is_json(path) {
            let value: serde_json::Value =
                serde_json::from_str(strip_bom(text)).map_err(|e| LoaderError::Json {
                    path: path.to_path_buf(),
                    source: Arc::new(e),
                })?;
            ctx.record.set_exports(Exports::from(value));
            return Ok(());
        }

        if is_native(path) {
            let module = NativeModule::open(path)?;
            ctx.record.set_exports(Exports::Native(Arc::new(module)));
            return Ok(());
        }

        let executor = self.executors.for_path(path);
        let source = strip_shebang(strip_bom(text));
        match mode {
            IoMode::Async => {
                match tokio::time::timeout(self.timeout, executor.execute(ctx, source, mode)).await {
                    Ok(result) => result,
                    Err(_) => Err(self.timed_out(path)),
                }
            }
            IoMode::Sync => {
                executor.execute(ctx, source, mode).await?;
                if started.elapsed() > self.timeout {
                    return Err(self.timed_out(path));
                }
                Ok(())
            }
        }
    }

    fn timed_out(&self, path: &Path) -> LoaderError {
        LoaderError::Timeout {
            path: path.to_path_buf(),
            budget: self.timeout,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Drop a leading `#!` line, keeping the newline so line numbers hold
fn strip_shebang(text: &str) -> &str {
    if text.starts_with("#!") {
        text.find('\n').map_or("", |idx| &text[idx..])
    } else {
        text
    }
}
