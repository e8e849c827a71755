// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Exported values of loaded modules

use crate::error::LoaderError;
use crate::module_system::NativeModule;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What a module exports
#[derive(Debug, Clone)]
pub enum Exports {
    /// Data exported by a script or JSON module
    Value(Value),
    /// Evaluation failure kept as the module's value after an error
    /// listener chose to ignore it
    Error(LoaderError),
    /// Loaded dynamic library
    Native(Arc<NativeModule>),
    /// Core module with no host registration
    Core(String),
}

impl Exports {
    /// Fresh, empty exports object
    pub fn empty() -> Self {
        Self::Value(Value::Object(Map::new()))
    }

    /// The exported data, if this is a value
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The kept error, if evaluation failed and the failure was ignored
    pub fn as_error(&self) -> Option<&LoaderError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this is an error-as-value
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Look up a dotted property path, e.g. `"config.port"`
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.as_value()?;
        for key in path.split('.').filter(|k| !k.is_empty()) {
            current = current.get(key)?;
        }
        Some(current)
    }

    /// Set a (nested) property, turning non-object intermediates into objects
    pub fn set_path(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            *self = Self::Value(value);
            return;
        };

        if !matches!(self, Self::Value(Value::Object(_))) {
            *self = Self::empty();
        }
        let Self::Value(root) = self else {
            return;
        };

        let mut current = root;
        for key in parents {
            current = object_entry(current, key);
        }
        if let Value::Object(map) = current {
            map.insert((*last).to_string(), value);
        }
    }

    /// JSON rendering, used for printing and for nesting exports inside
    /// other values
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Error(err) => serde_json::json!({ "error": err.to_string() }),
            Self::Native(module) => {
                serde_json::json!({ "native": module.path().display().to_string() })
            }
            Self::Core(name) => serde_json::json!({ "core": name }),
        }
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Exports {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => {
            let child = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            child
        }
        other => other,
    }
}
