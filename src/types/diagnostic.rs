use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte offsets into the source text. `end` is exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Self::new(r.start, r.end)
    }
}

/// A 0-based line/character position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.character + 1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Line start offsets of a source text, used to turn [`Span`]s into [`Range`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn position(&self, offset: usize) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(l) => l,
            Err(l) => l.saturating_sub(1),
        };
        let start = self.line_starts.get(line).copied().unwrap_or(0);
        Position::new(line as u32, offset.saturating_sub(start) as u32)
    }

    #[must_use]
    pub fn range(&self, span: Span) -> Range {
        Range::new(self.position(span.start), self.position(span.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Machine-readable diagnostic codes. Serialized as `CODE_*` strings so editor
/// integrations can key quick-fixes on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    #[serde(rename = "CODE_PARSER")]
    Parser,
    #[serde(rename = "CODE_UNKNOWN_VARIABLE")]
    UnknownVariable,
    #[serde(rename = "CODE_INVALID_REDCAP_ID")]
    InvalidRedcapId,
    #[serde(rename = "CODE_UNKNOWN_REDCAP_FIELD")]
    UnknownRedcapField,
    #[serde(rename = "CODE_INVALID_FHIR_ID")]
    InvalidFhirId,
    #[serde(rename = "CODE_INVALID_FHIR_RESOURCE")]
    InvalidFhirResource,
    #[serde(rename = "CODE_INVALID_FHIR_ATTRIBUTE_PATH")]
    InvalidFhirAttributePath,
    #[serde(rename = "CODE_FHIR_ATTRIBUTE_NOT_ALLOWED")]
    FhirAttributeNotAllowed,
    #[serde(rename = "CODE_INVALID_FHIR_ATTRIBUTE_INDEX")]
    InvalidFhirAttributeIndex,
    #[serde(rename = "CODE_INCOMPATIBLE_TYPE")]
    IncompatibleType,
    #[serde(rename = "CODE_INCOMPATIBLE_EXPRESSION")]
    IncompatibleExpression,
    #[serde(rename = "CODE_INVALID_DATE_PRECISION")]
    InvalidDatePrecision,
    #[serde(rename = "CODE_INVALID_URI")]
    InvalidUri,
    #[serde(rename = "CODE_INVALID_URL")]
    InvalidUrl,
    #[serde(rename = "CODE_INVALID_UUID")]
    InvalidUuid,
    #[serde(rename = "CODE_INVALID_CANONICAL")]
    InvalidCanonical,
    #[serde(rename = "CODE_INVALID_ALIAS")]
    InvalidAlias,
    #[serde(rename = "CODE_INVALID_REFERENCE_TYPE")]
    InvalidReferenceType,
    #[serde(rename = "CODE_MAPPING_MISSING")]
    MappingMissing,
    #[serde(rename = "CODE_MAPPING_NOT_NEEDED")]
    MappingNotNeeded,
    #[serde(rename = "CODE_MAPPED_FIELD_DOES_NOT_EXIST")]
    MappedFieldDoesNotExist,
    #[serde(rename = "CODE_MAPPED_FIELD_LABEL_MISMATCH")]
    MappedFieldLabelMismatch,
    #[serde(rename = "CODE_MAPPING_AND_SECTION_MISSING")]
    MappingAndSectionMissing,
    #[serde(rename = "CODE_UNKNOWN_FHIR_RESOURCE")]
    UnknownFhirResource,
    #[serde(rename = "CODE_VALIDATOR_UNAVAILABLE")]
    ValidatorUnavailable,
    #[serde(rename = "CODE_GRAPH")]
    Graph,
    #[serde(rename = "CODE_TRANSFORM")]
    Transform,
    #[serde(rename = "CODE_COMPILER_ERROR")]
    CompilerError,
}

impl DiagnosticCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::Parser => "CODE_PARSER",
            DiagnosticCode::UnknownVariable => "CODE_UNKNOWN_VARIABLE",
            DiagnosticCode::InvalidRedcapId => "CODE_INVALID_REDCAP_ID",
            DiagnosticCode::UnknownRedcapField => "CODE_UNKNOWN_REDCAP_FIELD",
            DiagnosticCode::InvalidFhirId => "CODE_INVALID_FHIR_ID",
            DiagnosticCode::InvalidFhirResource => "CODE_INVALID_FHIR_RESOURCE",
            DiagnosticCode::InvalidFhirAttributePath => "CODE_INVALID_FHIR_ATTRIBUTE_PATH",
            DiagnosticCode::FhirAttributeNotAllowed => "CODE_FHIR_ATTRIBUTE_NOT_ALLOWED",
            DiagnosticCode::InvalidFhirAttributeIndex => "CODE_INVALID_FHIR_ATTRIBUTE_INDEX",
            DiagnosticCode::IncompatibleType => "CODE_INCOMPATIBLE_TYPE",
            DiagnosticCode::IncompatibleExpression => "CODE_INCOMPATIBLE_EXPRESSION",
            DiagnosticCode::InvalidDatePrecision => "CODE_INVALID_DATE_PRECISION",
            DiagnosticCode::InvalidUri => "CODE_INVALID_URI",
            DiagnosticCode::InvalidUrl => "CODE_INVALID_URL",
            DiagnosticCode::InvalidUuid => "CODE_INVALID_UUID",
            DiagnosticCode::InvalidCanonical => "CODE_INVALID_CANONICAL",
            DiagnosticCode::InvalidAlias => "CODE_INVALID_ALIAS",
            DiagnosticCode::InvalidReferenceType => "CODE_INVALID_REFERENCE_TYPE",
            DiagnosticCode::MappingMissing => "CODE_MAPPING_MISSING",
            DiagnosticCode::MappingNotNeeded => "CODE_MAPPING_NOT_NEEDED",
            DiagnosticCode::MappedFieldDoesNotExist => "CODE_MAPPED_FIELD_DOES_NOT_EXIST",
            DiagnosticCode::MappedFieldLabelMismatch => "CODE_MAPPED_FIELD_LABEL_MISMATCH",
            DiagnosticCode::MappingAndSectionMissing => "CODE_MAPPING_AND_SECTION_MISSING",
            DiagnosticCode::UnknownFhirResource => "CODE_UNKNOWN_FHIR_RESOURCE",
            DiagnosticCode::ValidatorUnavailable => "CODE_VALIDATOR_UNAVAILABLE",
            DiagnosticCode::Graph => "CODE_GRAPH",
            DiagnosticCode::Transform => "CODE_TRANSFORM",
            DiagnosticCode::CompilerError => "CODE_COMPILER_ERROR",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured data attached to a diagnostic for editor quick-fixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// Replace `original` with `suggestion` at the diagnostic's range.
    #[serde(rename_all = "camelCase")]
    ReplacementSuggestion { original: String, suggestion: String },
    /// A schema field, with its label, that a fix may insert.
    #[serde(rename_all = "camelCase")]
    LabeledField { field_id: String, label: String },
    /// A bare identifier (field id or `Type<id>`) the diagnostic is about.
    Identifier(String),
}

/// A problem found while parsing, compiling, resolving or materializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: Range,
    pub code: Option<DiagnosticCode>,
    pub payload: Option<Payload>,
    pub source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn error(message: impl Into<String>, range: Range, source: &str) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            range,
            code: None,
            payload: None,
            source: source.to_owned(),
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>, range: Range, source: &str) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message, range, source)
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.range.start, self.message)?;
        if let Some(code) = self.code {
            write!(f, " [{code}]")?;
        }
        Ok(())
    }
}

/// True when any diagnostic in the slice is an error. Warnings alone count as success.
#[must_use]
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
