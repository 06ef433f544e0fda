use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Span, Value};

/// One segment of an attribute path, e.g. `coding[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    /// Explicit list position. `None` means "append" on a list leaf or "first
    /// element" on an intermediate list.
    pub index: Option<usize>,
    /// An index written as `[${var}]`, pending REPEAT substitution.
    pub index_template: Option<String>,
    /// Set during compilation from the path validator, or from the presence of
    /// an explicit index when no validator is attached.
    pub is_list: bool,
    /// Profiled extension url for `extension` segments.
    pub extension_url: Option<String>,
}

impl Attribute {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn indexed(name: &str, index: usize) -> Self {
        Self {
            name: name.to_owned(),
            index: Some(index),
            is_list: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_list(mut self, is_list: bool) -> Self {
        self.is_list = is_list;
        self
    }

    #[must_use]
    pub fn is_extension(&self) -> bool {
        self.name == "extension" || self.name == "modifierExtension"
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (&self.index, &self.index_template) {
            (Some(i), _) => write!(f, "[{i}]"),
            (None, Some(t)) => write!(f, "[{t}]"),
            (None, None) => Ok(()),
        }
    }
}

/// `path = value` inside a resource statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub attributes: Vec<Attribute>,
    pub value: Value,
    pub span: Span,
    /// FHIR type of the leaf element, filled in during compilation when a
    /// path validator is available.
    pub value_type: Option<String>,
    pub target_profiles: Vec<String>,
}

impl AttributeValue {
    #[must_use]
    pub fn new(attributes: Vec<Attribute>, value: Value) -> Self {
        Self {
            attributes,
            value,
            span: Span::default(),
            value_type: None,
            target_profiles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Dotted path without indices, e.g. `code.coding`.
    #[must_use]
    pub fn path_without_indices(&self) -> String {
        self.attributes
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.attributes.iter().map(ToString::to_string).collect();
        write!(f, "{} = {}", path.join("."), self.value)
    }
}

/// Build a simple dotted path, e.g. `path("code.coding")`.
#[must_use]
pub fn path(dotted: &str) -> Vec<Attribute> {
    dotted.split('.').map(Attribute::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_indices() {
        let av = AttributeValue::new(
            vec![Attribute::indexed("identifier", 0), Attribute::new("value")],
            Value::from("x"),
        );
        assert_eq!(av.to_string(), "identifier[0].value = 'x'");
        assert_eq!(av.path_without_indices(), "identifier.value");
    }

    #[test]
    fn template_index_displayed_until_substituted() {
        let mut a = Attribute::new("coding");
        a.index_template = Some("${x}".into());
        assert_eq!(a.to_string(), "coding[${x}]");
    }

    #[test]
    fn path_helper_splits_segments() {
        let p = path("code.coding");
        assert_eq!(p.len(), 2);
        assert_eq!(p[1].name, "coding");
        assert!(!p[0].is_list);
    }

    #[test]
    fn extension_segments() {
        assert!(Attribute::new("extension").is_extension());
        assert!(!Attribute::new("code").is_extension());
    }
}
