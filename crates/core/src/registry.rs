//! Name → factory lookup table for pluggable input and output kinds.
//!
//! A [`Registry`] is built once during startup wiring: each sink or source
//! module calls its `register_*` function, which adds the kind under all of
//! its aliases. After that the table is only read, so it can be shared
//! behind an `Arc` without locking.
//!
//! ```ignore
//! let mut outputs = Registry::new("output");
//! register_builtin_outputs(&mut outputs);
//!
//! let factory = outputs.resolve(&definition.kind)?;
//! let output = factory(&ctx, &definition.params)?;
//! ```

use std::collections::BTreeMap;

use crate::error::RegistryError;

/// Name → factory table.
///
/// `F` is usually a plain `fn` pointer, which keeps entries `Copy` and
/// lookups allocation-free. Names are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct Registry<F> {
    category: &'static str,
    entries: BTreeMap<String, F>,
}

impl<F: Copy> Registry<F> {
    /// Creates an empty registry. `category` is used in error messages
    /// (`"input"`, `"output"`).
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            entries: BTreeMap::new(),
        }
    }

    /// Adds `factory` under `name`.
    ///
    /// Registration is append-only: the first factory registered for a
    /// name wins and later attempts return `false` without replacing it.
    /// Blank names are ignored.
    pub fn register(&mut self, name: &str, factory: F) -> bool {
        let key = normalize(name);
        if key.is_empty() {
            tracing::warn!(category = self.category, "ignoring registration with blank name");
            return false;
        }
        if self.entries.contains_key(&key) {
            tracing::debug!(
                category = self.category,
                name = %key,
                "kind already registered, keeping the first factory"
            );
            return false;
        }
        self.entries.insert(key, factory);
        true
    }

    /// Adds the same factory under several aliases. Returns how many names
    /// were newly registered.
    pub fn register_aliases(&mut self, names: &[&str], factory: F) -> usize {
        names
            .iter()
            .filter(|name| self.register(name, factory))
            .count()
    }

    /// Looks up a factory. A miss is not an error at this layer.
    pub fn lookup(&self, name: &str) -> Option<F> {
        self.entries.get(&normalize(name)).copied()
    }

    /// Looks up a factory and reports a miss as [`RegistryError::UnknownKind`].
    pub fn resolve(&self, name: &str) -> Result<F, RegistryError> {
        self.lookup(name).ok_or_else(|| RegistryError::UnknownKind {
            category: self.category.to_owned(),
            name: name.to_owned(),
        })
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of registered names (aliases counted separately).
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The category given at construction.
    pub fn category(&self) -> &'static str {
        self.category
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
