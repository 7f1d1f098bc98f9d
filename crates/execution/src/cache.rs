//! Template cache.
//!
//! Compiled templates are memoized per (definition name, run mode). Once
//! inserted an entry is never mutated; callers get shared read-only handles
//! and clone what they need. Failed compilations are cached too, so a broken
//! definition is reported once rather than on every request.

use crate::compiler::{compile_template, InstanceTemplate};
use envquery_core::{CompileError, QueryDefinition, RunMode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of compiling one (definition, mode) pair.
pub type CachedTemplate = Result<Arc<InstanceTemplate>, CompileError>;

/// Cache entries for one definition.
struct DefinitionEntry {
    definition: Arc<QueryDefinition>,
    templates: HashMap<RunMode, CachedTemplate>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that compiled
    pub misses: u64,
}

/// Memoizes compiled templates.
#[derive(Default)]
pub struct TemplateCache {
    entries: HashMap<String, DefinitionEntry>,
    stats: CacheStats,
}

impl TemplateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached template for `definition` and `mode`, compiling on a miss.
    pub fn get_or_compile(
        &mut self,
        definition: &Arc<QueryDefinition>,
        mode: RunMode,
    ) -> CachedTemplate {
        if let Some(cached) = self
            .entries
            .get(definition.name.as_str())
            .and_then(|entry| entry.templates.get(&mode))
        {
            self.stats.hits += 1;
            return cached.clone();
        }

        self.stats.misses += 1;
        debug!(target: "envquery", "Compiling query [{}] for {}", definition.name, mode);
        let compiled = compile_template(definition, mode).map(Arc::new);

        self.entries
            .entry(definition.name.clone())
            .or_insert_with(|| DefinitionEntry {
                definition: Arc::clone(definition),
                templates: HashMap::new(),
            })
            .templates
            .insert(mode, compiled.clone());

        compiled
    }

    /// A cached definition by name.
    pub fn find_definition(&self, name: &str) -> Option<Arc<QueryDefinition>> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(&entry.definition))
    }

    /// Drop every entry. Running queries keep their own copies.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached (definition, mode) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(|entry| entry.templates.len()).sum()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss counters since creation.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
