//! Source-data schemas and the per-field capabilities the compiler and
//! materializer rely on.

mod redcap;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use redcap::{FieldType, RedcapField, TextValidation};

use crate::row::Row;
use crate::types::{Coding, DatePrecision, Mapping, Value};

/// Errors produced when loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema entry {index} is missing required key '{key}'")]
    MissingKey { index: usize, key: &'static str },

    #[error("schema has no fields")]
    Empty,

    #[error("unsupported schema type '{0}'")]
    UnsupportedKind(String),
}

/// Errors produced when extracting a typed value from a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("Tried to assign REDCap {source_kind} field to FHIR type {target}. Only {supported}.")]
    Unsupported {
        source_kind: String,
        target: PrimitiveKind,
        supported: &'static str,
    },

    #[error("REDCap field type {field_type} is not supported in a VALUE expression (field: {field_id})")]
    UnsupportedFieldType { field_type: String, field_id: String },

    #[error("Could not parse {kind}: {value}")]
    Parse { kind: &'static str, value: String },

    #[error("Field {0} has no value in this row.")]
    Missing(String),

    #[error("{0} is not a finite decimal.")]
    NonFinite(String),
}

/// Primitive target kinds a field value can be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Instant,
    Time,
}

impl PrimitiveKind {
    /// Map a FHIR primitive type name to the kind used for coercion.
    #[must_use]
    pub fn from_fhir_type(name: &str) -> Option<Self> {
        Some(match name {
            "string" | "markdown" | "id" | "uri" | "url" | "canonical" | "oid" | "uuid" | "code"
            | "xhtml" | "base64Binary" => PrimitiveKind::String,
            "integer" | "positiveInt" | "unsignedInt" | "integer64" => PrimitiveKind::Integer,
            "decimal" => PrimitiveKind::Decimal,
            "boolean" => PrimitiveKind::Boolean,
            "date" => PrimitiveKind::Date,
            "dateTime" => PrimitiveKind::DateTime,
            "instant" => PrimitiveKind::Instant,
            "time" => PrimitiveKind::Time,
            _ => return None,
        })
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Decimal => "decimal",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Date => "date",
            PrimitiveKind::DateTime => "dateTime",
            PrimitiveKind::Instant => "instant",
            PrimitiveKind::Time => "time",
        };
        f.write_str(name)
    }
}

/// A value coerced from raw row text.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(String),
    DateTime(String),
    Instant(String),
    Time(String),
}

impl TypedValue {
    /// JSON form of the value.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NonFinite`] for a NaN or infinite decimal, which
    /// JSON cannot represent.
    pub fn into_json(self) -> Result<serde_json::Value, FieldError> {
        Ok(match self {
            TypedValue::String(s)
            | TypedValue::Date(s)
            | TypedValue::DateTime(s)
            | TypedValue::Instant(s)
            | TypedValue::Time(s) => serde_json::Value::String(s),
            TypedValue::Integer(i) => serde_json::Value::from(i),
            TypedValue::Decimal(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .ok_or_else(|| FieldError::NonFinite(d.to_string()))?,
            TypedValue::Boolean(b) => serde_json::Value::Bool(b),
        })
    }
}

/// Capabilities of one field of a source-data schema.
///
/// Implemented once per schema kind. The compiler uses the compatibility and
/// mapping checks; the materializer uses the extraction methods.
pub trait Field: fmt::Debug + Send + Sync {
    fn field_id(&self) -> &str;

    fn label(&self) -> &str;

    /// Human-readable type, e.g. `REDCap (TEXT, DATE_YMD)`.
    fn type_name(&self) -> String;

    /// Whether `value` may be used on this field. Reasons for a `false`
    /// result are appended to `issues`.
    fn is_compatible_with(&self, value: &Value, issues: &mut Vec<String>) -> bool;

    /// Whether resolving `value` requires a `MAPPINGS` entry.
    fn needs_mapping(&self, value: &Value) -> bool;

    /// Mapping for the option selected in `row`, for enumerated fields.
    fn find_selected_mapping<'m>(
        &self,
        mappings: &'m IndexMap<String, Mapping>,
        row: &Row,
    ) -> Option<&'m Mapping>;

    fn find_mapping<'m>(&self, mappings: &'m IndexMap<String, Mapping>) -> Option<&'m Mapping> {
        mappings.get(self.field_id())
    }

    /// Coding carried in the row value itself, for controlled-vocabulary
    /// fields. `None` when the field is not such a field or has no value.
    fn coding(&self, row: &Row) -> Option<Coding>;

    /// Coerce the row value to `kind`.
    ///
    /// # Errors
    ///
    /// Returns a [`FieldError`] when the field type cannot produce `kind` or the
    /// raw text does not parse.
    fn value(
        &self,
        row: &Row,
        kind: PrimitiveKind,
        precision: Option<DatePrecision>,
    ) -> Result<TypedValue, FieldError>;

    /// Synthetic child fields, one per option, addressed as `fieldId___code`.
    fn options(&self) -> Vec<Arc<dyn Field>>;

    /// Kind used when the target type is not known.
    fn natural_kind(&self) -> PrimitiveKind;

    /// Multi-select fields, where `NOTNULL` means "any option ticked".
    fn is_multi_select(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaKind {
    Redcap,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Redcap => write!(f, "REDCAP"),
        }
    }
}

/// An ordered set of fields. Option fields are addressable by id but are not
/// part of the top-level order.
#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
    fields: Vec<Arc<dyn Field>>,
    by_id: HashMap<String, Arc<dyn Field>>,
}

impl Schema {
    #[must_use]
    pub fn new(kind: SchemaKind, fields: Vec<Arc<dyn Field>>) -> Self {
        let mut by_id = HashMap::new();
        for field in &fields {
            by_id.insert(field.field_id().to_owned(), Arc::clone(field));
            for option in field.options() {
                by_id.insert(option.field_id().to_owned(), option);
            }
        }
        Self {
            kind,
            fields,
            by_id,
        }
    }

    #[must_use]
    pub fn redcap(fields: Vec<RedcapField>) -> Self {
        let fields = fields
            .into_iter()
            .map(|f| Arc::new(f) as Arc<dyn Field>)
            .collect();
        Self::new(SchemaKind::Redcap, fields)
    }

    /// Import a REDCap data dictionary JSON export.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the JSON is malformed, an entry lacks
    /// `field_name`, or there are no entries.
    pub fn from_redcap_json(json: &str) -> Result<Self, SchemaError> {
        redcap::import_json(json).map(Self::redcap)
    }

    #[must_use]
    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Look up a field or option field by id.
    #[must_use]
    pub fn field(&self, field_id: &str) -> Option<&dyn Field> {
        self.by_id.get(field_id).map(|f| &**f)
    }

    pub fn fields(&self) -> impl Iterator<Item = &dyn Field> {
        self.fields.iter().map(|f| &**f)
    }

    /// Every addressable id, options included, sorted.
    #[must_use]
    pub fn field_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The record identifier field: the first field of the schema.
    #[must_use]
    pub fn unique_field_id(&self) -> Option<&str> {
        self.fields.first().map(|f| f.field_id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
