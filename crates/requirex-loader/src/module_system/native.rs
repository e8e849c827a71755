// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Native modules backed by dynamic libraries

use crate::error::{LoaderError, Result};
use libloading::{Library, Symbol};
use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions loaded through the dynamic library loader
pub const NATIVE_EXTENSIONS: &[&str] = &[".node", ".so", ".dylib", ".dll"];

/// Whether `path` names a native module
pub fn is_native(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    NATIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// A loaded dynamic library
pub struct NativeModule {
    path: PathBuf,
    /// Kept alive for as long as the module is cached
    library: Library,
}

impl NativeModule {
    /// Load the library at `path`
    pub fn open(path: &Path) -> Result<Self> {
        // Symbols stay local to the module
        #[cfg(unix)]
        let library = unsafe {
            let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_LOCAL;
            libloading::os::unix::Library::open(Some(path), flags)
                .map(Library::from)
                .map_err(|e| native_error(path, e))?
        };
        #[cfg(not(unix))]
        let library = unsafe { Library::new(path).map_err(|e| native_error(path, e))? };

        tracing::debug!(path = %path.display(), "Loaded native module");
        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the library exports `name`
    pub fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: the symbol is looked up but never called or dereferenced
        unsafe { self.library.get::<*const ()>(name.as_bytes()).is_ok() }
    }

    /// Look up an exported symbol.
    ///
    /// # Safety
    ///
    /// `T` must match the actual type of the symbol.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>> {
        unsafe {
            self.library
                .get(name.as_bytes())
                .map_err(|e| native_error(&self.path, e))
        }
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("path", &self.path)
            .finish()
    }
}

fn native_error(path: &Path, err: libloading::Error) -> LoaderError {
    LoaderError::Native {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
