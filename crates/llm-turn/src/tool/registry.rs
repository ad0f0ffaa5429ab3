//! Tool registry: name to handler lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::ToolHandler;
use crate::config::ToolSelection;
use crate::provider::ToolDefinition;

/// A registry of tool handlers, indexed by name.
///
/// Lookups are case-insensitive: `Search`, `search`, and `SEARCH` all
/// resolve to the same handler. The registry is read-only during a turn
/// and cheap to clone, so one registry can back any number of concurrent
/// turns.
///
/// ```rust
/// use llm_turn::tool::{ToolError, ToolRegistry, tool_fn};
/// use llm_turn::{JsonSchema, ToolDefinition};
/// use serde_json::json;
///
/// let mut registry = ToolRegistry::new();
/// registry.register(tool_fn(
///     ToolDefinition::new("Search", "Search the web", JsonSchema::new(json!({"type": "object"}))),
///     |_args: String| async { Ok::<_, ToolError>("no results") },
/// ));
///
/// assert!(registry.contains("search"));
/// assert_eq!(registry.names(), vec!["Search".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool handler.
    ///
    /// A handler whose name matches an existing one (ignoring case)
    /// replaces it.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    /// Registers a shared tool handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        let name = key(&handler.definition().name);
        self.handlers.insert(name, handler);
        self
    }

    /// Returns the handler for the given tool name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(&key(name))
    }

    /// Returns whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&key(name))
    }

    /// Registered tool names as declared by their definitions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .values()
            .map(|h| h.definition().name)
            .collect();
        names.sort();
        names
    }

    /// Definitions of all registered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.handlers.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns a new registry excluding the named tools.
    ///
    /// Useful for scoping what a nested assistant may call.
    #[must_use]
    pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let exclude: HashSet<String> = names.into_iter().map(key).collect();
        self.filtered(|name| !exclude.contains(name))
    }

    /// Returns a new registry with only the named tools.
    #[must_use]
    pub fn only<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let include: HashSet<String> = names.into_iter().map(key).collect();
        self.filtered(|name| include.contains(name))
    }

    /// Returns the registry scoped to a [`ToolSelection`].
    #[must_use]
    pub fn select(&self, selection: &ToolSelection) -> Self {
        match selection {
            ToolSelection::All => self.clone(),
            ToolSelection::Only(names) => self.only(names.iter().map(String::as_str)),
            ToolSelection::Without(names) => self.without(names.iter().map(String::as_str)),
        }
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
                .collect(),
        }
    }
}
