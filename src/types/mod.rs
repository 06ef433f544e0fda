mod attribute;
mod condition;
mod diagnostic;
mod document;
mod literal;
mod resource;
mod rule;
mod value;

pub use attribute::{Attribute, AttributeValue, path};
pub use condition::{
    CompareOp, Condition, ConditionKind, FieldCondition, NodeOp, not_null, null, value,
};
pub use diagnostic::{
    Diagnostic, DiagnosticCode, LineIndex, Payload, Position, Range, Severity, Span, has_errors,
};
pub use document::{Coding, Document, Mapping, SchemaRef, strip_option_suffix};
pub use literal::Literal;
pub use resource::{DataReference, Resource, ResourceKey};
pub use rule::{Body, Repeat, Rule};
pub use value::{DatePrecision, Value};
