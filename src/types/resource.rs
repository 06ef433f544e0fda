use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AttributeValue, Span, Value};

/// Identity of a logical output record within a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    #[must_use]
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            id: id.to_owned(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.resource_type, self.id)
    }
}

/// Whether a record depends on row data. Ordered so a merge can only move
/// upwards: `No < Resource < Yes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataReference {
    /// Literal values only: one shared record per document.
    No,
    /// Depends on what it references.
    Resource,
    /// Reads row data: one record per row.
    Yes,
}

/// A `Type<id>` statement with its attribute assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: String,
    pub id: String,
    pub attributes: Vec<AttributeValue>,
    pub span: Span,
}

impl Resource {
    #[must_use]
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            id: id.to_owned(),
            attributes: Vec::new(),
            span: Span::default(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, attribute: AttributeValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_type, &self.id)
    }

    /// Targets of every `REF(..)` among the attributes, in attribute order.
    #[must_use]
    pub fn references(&self) -> Vec<ResourceKey> {
        self.attributes
            .iter()
            .filter_map(|av| match &av.value {
                Value::Reference { resource_type, id } => Some(ResourceKey::new(resource_type, id)),
                _ => None,
            })
            .collect()
    }

    /// Tag contribution of this statement alone.
    #[must_use]
    pub fn data_reference(&self) -> DataReference {
        if self.attributes.iter().any(|av| av.value.is_field_based()) {
            DataReference::Yes
        } else if self
            .attributes
            .iter()
            .any(|av| matches!(av.value, Value::Reference { .. }))
        {
            DataReference::Resource
        } else {
            DataReference::No
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.resource_type, self.id)
    }
}
