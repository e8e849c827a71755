// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! CLI argument parsing for requirex.

use clap::{Args, Parser, Subcommand};
use requirex_loader::{LoaderConfig, ResolveOptions, WorkspaceId};
use std::path::PathBuf;

/// requirex - resolve, load and evaluate modules
#[derive(Parser, Debug)]
#[command(name = "requirex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging for the loader
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory specifiers are resolved from (default: current directory)
    #[arg(short, long, global = true)]
    pub basedir: Option<PathBuf>,

    /// Extensions to probe, in order (e.g. `-e .json -e .js`)
    #[arg(short, long = "ext", global = true)]
    pub extensions: Vec<String>,

    /// Extra directory searched for bare specifiers
    #[arg(long = "path", global = true)]
    pub paths: Vec<PathBuf>,

    /// Workspace to evaluate modules in (repeatable)
    #[arg(short, long = "workspace", global = true)]
    pub workspaces: Vec<WorkspaceId>,

    /// Keep symlinked paths instead of canonicalizing them
    #[arg(long, global = true)]
    pub preserve_symlinks: bool,

    /// Evaluation budget per module, in milliseconds
    #[arg(long, global = true, env = "REQUIREX_EVALUATION_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Treat hard-linked files as one module
    #[arg(long, global = true)]
    pub link_aware: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load modules and print their exports
    #[command(alias = "require")]
    Load(LoadArgs),

    /// Print the file a specifier resolves to
    Resolve(ResolveArgs),

    /// Print the exports of the first module that loads
    Try(TryArgs),

    /// Load every module in a directory
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Module specifiers
    #[arg(required = true)]
    pub specifiers: Vec<String>,

    /// Evaluate through the blocking loader path
    #[arg(long)]
    pub sync: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Module specifiers
    #[arg(required = true)]
    pub specifiers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TryArgs {
    /// Candidate specifiers, tried in order
    #[arg(required = true)]
    pub specifiers: Vec<String>,

    /// JSON printed when no candidate loads
    #[arg(long, default_value = "null")]
    pub default: String,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Directory to import
    pub dir: PathBuf,

    /// Merge object exports into one map
    #[arg(long)]
    pub merge: bool,

    /// Only import these files
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip these files
    #[arg(long)]
    pub exclude: Vec<String>,
}

impl Cli {
    /// Project configuration with command line overrides applied
    pub fn config(&self) -> requirex_loader::Result<LoaderConfig> {
        let mut config = LoaderConfig::load()?;
        if self.preserve_symlinks {
            config.preserve_symlinks = true;
        }
        if let Some(ms) = self.timeout_ms {
            config.evaluation_timeout_ms = ms;
        }
        if self.link_aware {
            config.link_aware_cache = true;
        }
        Ok(config)
    }

    /// Resolution options shared by every subcommand
    pub fn resolve_options(&self) -> ResolveOptions {
        let mut options = ResolveOptions::new().workspaces(self.workspaces.iter().copied());
        if let Some(basedir) = &self.basedir {
            options = options.basedir(basedir);
        }
        if !self.extensions.is_empty() {
            options = options.extensions(self.extensions.iter().cloned());
        }
        for path in &self.paths {
            options = options.path(path);
        }
        options
    }
}
