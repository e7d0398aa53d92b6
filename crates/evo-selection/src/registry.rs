//! Strategy registry for selection policies
//!
//! Provides [`PolicyRegistry`] for looking up selection strategies by name.

use crate::config::SelectionConfig;
use crate::error::SelectionError;
use std::collections::BTreeMap;

/// Registry of named selection strategies with their default parameters
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    strategies: BTreeMap<String, SelectionConfig>,
}

impl PolicyRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Create registry with built-in strategies
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SelectionConfig::Random);
        registry.register(SelectionConfig::ScoreProportional {
            floor: crate::DEFAULT_FLOOR,
        });
        registry.register(SelectionConfig::default());
        registry
    }

    /// Register a strategy under its own name, replacing any previous entry
    pub fn register(&mut self, config: SelectionConfig) {
        self.strategies.insert(config.name().to_string(), config);
    }

    /// Check if strategy exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Look up a strategy's registered configuration
    ///
    /// # Errors
    /// `UnknownStrategy` if no strategy has this name.
    pub fn get(&self, name: &str) -> Result<SelectionConfig, SelectionError> {
        self.strategies
            .get(name)
            .copied()
            .ok_or_else(|| SelectionError::UnknownStrategy(name.to_string()))
    }

    /// List all registered strategy names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Get number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
