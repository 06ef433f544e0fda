use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One record of source data: a flat map of field id to raw text, plus the
/// repeat instances of a hierarchical source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    fields: HashMap<String, String>,
    #[serde(default)]
    repeats: Vec<Row>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value. Returns `self` for chaining.
    #[must_use]
    pub fn set(mut self, field_id: &str, value: impl Into<String>) -> Self {
        self.fields.insert(field_id.to_owned(), value.into());
        self
    }

    pub fn insert(&mut self, field_id: &str, value: impl Into<String>) {
        self.fields.insert(field_id.to_owned(), value.into());
    }

    /// Attach a repeat instance.
    #[must_use]
    pub fn repeat(mut self, instance: Row) -> Self {
        self.repeats.push(instance);
        self
    }

    /// Raw value, including empty strings.
    #[must_use]
    pub fn get(&self, field_id: &str) -> Option<&str> {
        self.fields.get(field_id).map(String::as_str)
    }

    /// Raw value when present and not empty.
    #[must_use]
    pub fn non_empty(&self, field_id: &str) -> Option<&str> {
        self.get(field_id).filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn repeats(&self) -> &[Row] {
        &self.repeats
    }

    /// The primary object followed by every repeat instance. Each is evaluated
    /// on its own.
    pub fn objects(&self) -> impl Iterator<Item = &Row> {
        std::iter::once(self).chain(self.repeats.iter())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            repeats: Vec::new(),
        }
    }
}
