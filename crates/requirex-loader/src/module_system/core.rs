// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host-provided core modules

use crate::value::Exports;
use dashmap::DashMap;

/// Exports the host registers for core module names
#[derive(Debug, Default)]
pub struct CoreModules {
    modules: DashMap<String, Exports>,
}

impl CoreModules {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the exports for `name`
    pub fn register(&self, name: impl Into<String>, exports: Exports) {
        self.modules.insert(name.into(), exports);
    }

    /// Exports for `name`, falling back to an [`Exports::Core`] marker
    pub fn load(&self, name: &str) -> Exports {
        self.modules
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Exports::Core(name.to_string()))
    }

    /// Whether the host registered `name`
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Remove a registration
    pub fn unregister(&self, name: &str) -> Option<Exports> {
        self.modules.remove(name).map(|(_, exports)| exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registered_and_marker() {
        let core = CoreModules::new();
        core.register("os", Exports::from(json!({ "platform": "linux" })));

        assert!(core.contains("os"));
        assert_eq!(core.load("os").get("platform"), Some(&json!("linux")));
        assert!(matches!(core.load("fs"), Exports::Core(name) if name == "fs"));

        assert!(core.unregister("os").is_some());
        assert!(!core.contains("os"));
    }
}
