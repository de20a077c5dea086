//! Counter and database definitions.
//!
//! Definitions are registered once and never change afterwards: the first
//! registration of a code wins and later registrations are ignored.

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Display metadata and alert thresholds for one counter code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterDefinition {
    /// Upper-cased counter code
    pub code: String,
    pub label: String,
    pub warning_threshold: i64,
    pub critical_threshold: i64,
    pub priority: i32,
}

impl CounterDefinition {
    pub fn new(
        code: &str,
        label: &str,
        warning_threshold: i64,
        critical_threshold: i64,
        priority: i32,
    ) -> Self {
        Self {
            code: normalize_code(code),
            label: label.to_string(),
            warning_threshold,
            critical_threshold,
            priority,
        }
    }
}

/// Metadata describing a logical database, i.e. one hypercube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseDefinition {
    pub name: String,
    pub description: String,
    pub image_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<Vec<u8>>,
    pub priority: i32,
}

impl DatabaseDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            image_mime_type: None,
            image_data: None,
            priority: 0,
        }
    }

    /// Attach an icon to the database
    pub fn with_image(mut self, mime_type: &str, data: Vec<u8>) -> Self {
        self.image_mime_type = Some(mime_type.to_string());
        self.image_data = Some(data);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Counter codes are matched case-insensitively.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Default)]
struct Registry {
    by_code: AHashMap<String, Arc<CounterDefinition>>,
    ordered: Vec<Arc<CounterDefinition>>,
}

/// Registry of counter definitions, in registration order.
#[derive(Default)]
pub struct DefinitionRepository {
    inner: RwLock<Registry>,
}

impl DefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Returns the stored definition and whether
    /// this call created it.
    pub fn register(&self, definition: CounterDefinition) -> (Arc<CounterDefinition>, bool) {
        if let Some(existing) = self.get(&definition.code) {
            return (existing, false);
        }

        let mut registry = self.inner.write();
        // Another thread may have won between the read and the write lock
        if let Some(existing) = registry.by_code.get(&definition.code) {
            return (Arc::clone(existing), false);
        }

        let definition = Arc::new(definition);
        registry
            .by_code
            .insert(definition.code.clone(), Arc::clone(&definition));
        registry.ordered.push(Arc::clone(&definition));
        (definition, true)
    }

    /// Look up a definition by code, ignoring case
    pub fn get(&self, code: &str) -> Option<Arc<CounterDefinition>> {
        let registry = self.inner.read();
        match registry.by_code.get(code) {
            Some(definition) => Some(Arc::clone(definition)),
            None => registry.by_code.get(&normalize_code(code)).cloned(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    /// All definitions in registration order
    pub fn all(&self) -> Vec<Arc<CounterDefinition>> {
        self.inner.read().ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut registry = self.inner.write();
        registry.by_code.clear();
        registry.ordered.clear();
    }
}
