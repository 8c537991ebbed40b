use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Named values answered by the QUERY command.
///
/// Cheap to clone; all clones share one store. Values are kept as their string form.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl Variables {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`, storing the value's string form.
    pub fn set(&self, name: impl Into<String>, value: impl ToString) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.to_string());
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove `name`, returning its value.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Sorted variable names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
