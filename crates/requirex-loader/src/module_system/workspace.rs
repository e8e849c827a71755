// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Workspaces: shared, layered evaluation scopes
//!
//! A module evaluated without workspaces gets a private scope. Modules
//! evaluated with the same set of workspace ids share one scope, so a
//! binding written by one is visible to the others. Every scope falls back
//! to the process-wide global map.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Named bindings of a scope layer
pub type Bindings = Map<String, Value>;

type Layer = Arc<RwLock<Bindings>>;

/// Opaque workspace identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    /// Generate a fresh, unique id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Id of the default workspace
    pub fn default_id() -> Self {
        Self(Uuid::nil())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for WorkspaceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Layered binding lookup used while evaluating a module
pub struct IsolatedScope {
    layers: Vec<Layer>,
    global: Layer,
}

impl IsolatedScope {
    fn new(layers: Vec<Layer>, global: Layer) -> Self {
        Self { layers, global }
    }

    /// Look a name up through the layers, then the global map
    pub fn get(&self, name: &str) -> Option<Value> {
        self.layers
            .iter()
            .chain(std::iter::once(&self.global))
            .find_map(|layer| layer.read().get(name).cloned())
    }

    /// Whether any layer binds `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name` in the first layer
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let layer = self.layers.first().unwrap_or(&self.global);
        layer.write().insert(name.into(), value);
    }

    /// All visible bindings, earlier layers shadowing later ones
    pub fn snapshot(&self) -> Bindings {
        let mut merged = Bindings::new();
        for layer in std::iter::once(&self.global).chain(self.layers.iter().rev()) {
            for (key, value) in layer.read().iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Number of workspace layers, excluding the global map
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl fmt::Debug for IsolatedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedScope")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Registry of workspace layers and the scopes built from them
#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    layers: DashMap<WorkspaceId, Layer>,
    /// Keyed by the sorted id set
    scopes: DashMap<Vec<WorkspaceId>, Arc<IsolatedScope>>,
    global: Layer,
}

impl WorkspaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared scope for a set of workspaces, created on first use.
    ///
    /// The same set of ids yields the same scope regardless of order. Layer
    /// order is fixed by the first request. An empty slice selects the
    /// default workspace.
    pub fn get(&self, ids: &[WorkspaceId]) -> Arc<IsolatedScope> {
        let mut ordered: Vec<WorkspaceId> = Vec::with_capacity(ids.len().max(1));
        for id in ids {
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        if ordered.is_empty() {
            ordered.push(WorkspaceId::default_id());
        }

        let mut key = ordered.clone();
        key.sort();

        let scope = self.scopes.entry(key).or_insert_with(|| {
            tracing::debug!(workspaces = ordered.len(), "Creating workspace scope");
            let layers = ordered.iter().map(|id| self.layer(*id)).collect();
            Arc::new(IsolatedScope::new(layers, Arc::clone(&self.global)))
        });
        Arc::clone(scope.value())
    }

    /// A fresh scope with one private layer
    pub fn private_scope(&self) -> Arc<IsolatedScope> {
        Arc::new(IsolatedScope::new(
            vec![Layer::default()],
            Arc::clone(&self.global),
        ))
    }

    /// Merge bindings into a workspace, creating it if needed
    pub fn set(&self, id: WorkspaceId, bindings: Bindings) {
        let layer = self.layer(id);
        layer.write().extend(bindings);
    }

    /// Bindings of an existing workspace, without creating it
    pub fn exported_get(&self, id: WorkspaceId) -> Option<Bindings> {
        self.layers.get(&id).map(|layer| layer.read().clone())
    }

    /// The process-wide global map shared by every scope
    pub fn global(&self) -> Arc<RwLock<Bindings>> {
        Arc::clone(&self.global)
    }

    /// Id of the default workspace
    pub fn default_id(&self) -> WorkspaceId {
        WorkspaceId::default_id()
    }

    /// Drop every workspace and scope. The global map is kept.
    pub fn clear(&self) {
        self.scopes.clear();
        self.layers.clear();
    }

    /// Number of workspaces with bindings
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no workspace exists
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn layer(&self, id: WorkspaceId) -> Layer {
        Arc::clone(self.layers.entry(id).or_default().value())
    }
}
