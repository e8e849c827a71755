// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Filesystem access for the loader
//!
//! - [`ProbeCache`] memoizes existence checks and directory listings
//! - [`ContentLoader`] reads module source with in-flight de-duplication

mod content;
mod probe;

pub use content::ContentLoader;
pub use probe::{IoMode, ProbeCache};
