// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! requirex - an asynchronous module resolver, loader and evaluator
//!
//! This is the main entry point for the requirex CLI.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ImportArgs, LoadArgs, ResolveArgs, TryArgs};
use owo_colors::OwoColorize;
use requirex_loader::{Exports, ImportOptions, Loader, ResolveOptions, Resolved};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "requirex=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.config().context("invalid loader configuration")?;
    let loader = Loader::new(config);
    let options = cli.resolve_options();

    match &cli.command {
        Commands::Load(args) => load(&loader, &options, args).await,
        Commands::Resolve(args) => resolve(&loader, &options, args).await,
        Commands::Try(args) => try_module(&loader, &options, args).await,
        Commands::Import(args) => import(&loader, options, args).await,
    }
}

/// Load each specifier and print its exports
async fn load(loader: &Loader, options: &ResolveOptions, args: &LoadArgs) -> Result<()> {
    let exports = if args.sync {
        loader.require_sync_all(options, args.specifiers.as_slice()).await?
    } else {
        loader.require_all(options, args.specifiers.as_slice()).await?
    };

    for (specifier, exports) in args.specifiers.iter().zip(&exports) {
        if args.specifiers.len() > 1 {
            println!("{}", specifier.cyan().bold());
        }
        print_exports(exports)?;
    }
    tracing::debug!(modules = loader.modules().len(), "Load finished");
    Ok(())
}

async fn resolve(loader: &Loader, options: &ResolveOptions, args: &ResolveArgs) -> Result<()> {
    for specifier in &args.specifiers {
        match loader.resolve(specifier, options).await? {
            Resolved::Core(name) => println!("{} {}", name.green(), "(core)".dimmed()),
            Resolved::Path(path) => println!("{}", path.display()),
        }
    }
    Ok(())
}

async fn try_module(loader: &Loader, options: &ResolveOptions, args: &TryArgs) -> Result<()> {
    let default: serde_json::Value =
        serde_json::from_str(&args.default).context("--default must be JSON")?;
    let exports = loader
        .try_module_with(options, args.specifiers.as_slice(), Exports::from(default))
        .await;
    print_exports(&exports)
}

async fn import(loader: &Loader, options: ResolveOptions, args: &ImportArgs) -> Result<()> {
    let mut import = ImportOptions::new()
        .merge(args.merge)
        .resolve(options)
        .onload(|path, _| tracing::info!(module = %path.display(), "Imported"));
    for name in &args.include {
        import = import.include(name);
    }
    for name in &args.exclude {
        import = import.exclude(name);
    }

    let imports = loader
        .import_directory(&args.dir, import)
        .await
        .with_context(|| format!("failed to import '{}'", args.dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&imports)?);
    Ok(())
}

fn print_exports(exports: &Exports) -> Result<()> {
    if let Some(error) = exports.as_error() {
        println!("{} {}", "error:".yellow().bold(), error);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&exports.to_json())?);
    Ok(())
}
