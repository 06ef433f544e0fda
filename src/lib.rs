//! Compiler and materializer for the Redmatch rule language.
//!
//! Rule documents describe how rows of tabular clinical data become linked
//! FHIR-style records. The pipeline is:
//!
//! 1. [`Compiler::compile`] parses, expands `REPEAT` blocks and validates a
//!    document, attaching diagnostics.
//! 2. [`resolve_graph`] orders resources by their references and decides which
//!    are shared and which are built per row.
//! 3. [`Materializer::run`] evaluates the rules against each row and builds
//!    the output records.

mod accumulate;
mod compile;
mod config;
mod error;
mod evaluate;
mod expand;
mod graph;
mod materialize;
mod parse;
mod progress;
mod row;
pub mod schema;
#[cfg(feature = "binary-cache")]
mod serial;
mod suggest;
pub mod types;
mod validator;

pub use accumulate::{RecordBuilder, MAX_LIST_INDEX};
pub use compile::{compile, Compiler};
pub use config::{CompileConfig, Config, ConfigError, TransformConfig};
pub use error::RedmatchError;
pub use evaluate::evaluate;
pub use expand::expand;
pub use graph::{resolve_graph, Resolution};
pub use materialize::{materialize, Materialized, Materializer, TransformError};
pub use parse::{parse, parse_strict, ParseError};
pub use progress::{CancelToken, Progress, ProgressReporter, Stage};
pub use row::Row;
pub use schema::{
    Field, FieldError, FieldType, PrimitiveKind, RedcapField, Schema, SchemaError, SchemaKind,
    TextValidation, TypedValue,
};
#[cfg(feature = "binary-cache")]
pub use serial::{digest, CompiledArtifact, DeserializeError, SerializeError};
pub use suggest::{closest, edit_distance, fhirise_id};
pub use types::{Condition, Diagnostic, DiagnosticCode, Document, Severity, Value};
pub use validator::{split_extension, PathInfo, PathValidator, StaticPathValidator, ValidatorError};

/// Compile `source` against `schema`, resolve its graph and transform `rows`
/// with the default configuration.
///
/// # Errors
///
/// Returns [`RedmatchError::Transform`] when the document has errors or its
/// graph cannot be resolved. Compile with [`Compiler`] to inspect the
/// diagnostics in that case.
pub fn transform(source: &str, schema: &Schema, rows: &[Row]) -> Result<Materialized, RedmatchError> {
    let doc = Compiler::new().with_schema(schema).compile(source);
    let resolution = resolve_graph(&doc);
    Ok(Materializer::new(&doc, schema, &resolution).run(rows)?)
}
