use thiserror::Error;

use crate::config::ConfigError;
use crate::materialize::TransformError;
use crate::parse::ParseError;
use crate::schema::{FieldError, SchemaError};
use crate::validator::ValidatorError;

/// Unified error type covering parsing, schema loading, transformation,
/// configuration and I/O.
///
/// Returned by convenience functions like [`transform()`](crate::transform).
/// Problems found while compiling or materializing are reported as
/// [`Diagnostic`](crate::types::Diagnostic)s instead.
#[derive(Debug, Error)]
pub enum RedmatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}
