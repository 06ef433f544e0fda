use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::accumulate::MAX_LIST_INDEX;
use crate::config::CompileConfig;
use crate::expand::expand;
use crate::parse::parse;
use crate::schema::{PrimitiveKind, Schema};
use crate::suggest::{closest, fhirise_id};
use crate::types::{
    AttributeValue, Body, Condition, DatePrecision, Diagnostic, DiagnosticCode, Document,
    LineIndex, Mapping, Payload, Resource, ResourceKey, Rule, Span, Value,
};
use crate::validator::{split_extension, PathInfo, PathValidator};

static REDCAP_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][A-Za-z0-9_]*$").expect("static REDCap id pattern"));
static FHIR_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("static FHIR id pattern"));

const SOURCE: &str = "compiler";

const STRING_TYPES: &[&str] = &[
    "string", "markdown", "id", "uri", "oid", "uuid", "canonical", "url", "code",
];
const INTEGER_TYPES: &[&str] = &["integer", "positiveInt", "unsignedInt", "integer64", "decimal"];

/// Compiles rule text into a validated [`Document`].
///
/// Compilation never fails: every problem is a diagnostic on the returned
/// document. A fresh document is produced per call, so one compiler can be
/// shared between threads.
#[derive(Default, Clone)]
pub struct Compiler<'a> {
    schema: Option<&'a Schema>,
    validator: Option<&'a dyn PathValidator>,
    config: CompileConfig,
}

impl<'a> Compiler<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check field ids, field/value compatibility and mappings against `schema`.
    #[must_use]
    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Check resource types and attribute paths with `validator`.
    #[must_use]
    pub fn with_validator(mut self, validator: &'a dyn PathValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CompileConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn compile(&self, source: &str) -> Document {
        tracing::info!(bytes = source.len(), "compiling rule document");
        let mut doc = parse(source);
        if doc.has_errors() && self.config.stop_on_parse_errors {
            tracing::info!(
                diagnostics = doc.diagnostics.len(),
                "syntax errors found, skipping validation"
            );
            return doc;
        }

        expand(&mut doc);

        let created: HashSet<ResourceKey> = doc.resources().into_iter().map(Resource::key).collect();
        let Document {
            rules,
            aliases,
            mappings,
            mappings_section_present,
            diagnostics,
            line_index,
            ..
        } = &mut doc;

        let mut checker = Checker {
            line_index,
            aliases,
            schema: self.schema,
            validator: self.validator,
            created,
            needed: IndexMap::new(),
            diagnostics: Vec::new(),
        };
        checker.rules(rules);
        checker.mapping_aliases(mappings);
        if self.config.validate_mappings {
            checker.mappings(mappings, *mappings_section_present);
        }
        diagnostics.extend(checker.diagnostics);

        tracing::info!(
            rules = doc.rules.len(),
            diagnostics = doc.diagnostics.len(),
            errors = doc.has_errors(),
            "compiled rule document"
        );
        doc
    }
}

/// Compile without a schema or path validator.
#[must_use]
pub fn compile(source: &str) -> Document {
    Compiler::new().compile(source)
}

struct Checker<'c> {
    line_index: &'c LineIndex,
    aliases: &'c IndexMap<String, String>,
    schema: Option<&'c Schema>,
    validator: Option<&'c dyn PathValidator>,
    created: HashSet<ResourceKey>,
    /// Field ids that need a MAPPINGS entry, with the span of first use.
    needed: IndexMap<String, Span>,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn error(&mut self, message: String, span: Span, code: DiagnosticCode) -> &mut Diagnostic {
        let d = Diagnostic::error(message, self.line_index.range(span), SOURCE).with_code(code);
        self.diagnostics.push(d);
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    fn warning(&mut self, message: String, span: Span, code: DiagnosticCode) -> &mut Diagnostic {
        let d = Diagnostic::warning(message, self.line_index.range(span), SOURCE).with_code(code);
        self.diagnostics.push(d);
        let last = self.diagnostics.len() - 1;
        &mut self.diagnostics[last]
    }

    // -- Rules ------------------------------------------------------------------

    fn rules(&mut self, rules: &mut [Rule]) {
        for rule in rules {
            self.condition(&rule.condition);
            self.body(&mut rule.body);
            if let Some(else_body) = &mut rule.else_body {
                self.body(else_body);
            }
        }
    }

    fn condition(&mut self, condition: &Condition) {
        for id in condition.field_ids() {
            self.field_id(id, condition.span);
        }
    }

    fn body(&mut self, body: &mut Body) {
        for resource in &mut body.resources {
            self.resource(resource);
        }
        self.rules(&mut body.rules);
    }

    fn field_id(&mut self, id: &str, span: Span) {
        if !REDCAP_ID.is_match(id) {
            self.error(
                format!("Invalid REDCap field id '{id}'."),
                span,
                DiagnosticCode::InvalidRedcapId,
            );
            return;
        }
        let Some(schema) = self.schema else {
            return;
        };
        if schema.field(id).is_none() {
            let suggestion = closest(id, schema.field_ids()).map(str::to_owned);
            let d = self.error(
                format!("Unknown REDCap field '{id}'."),
                span,
                DiagnosticCode::UnknownRedcapField,
            );
            if let Some(suggestion) = suggestion {
                d.payload = Some(Payload::ReplacementSuggestion {
                    original: id.to_owned(),
                    suggestion,
                });
            }
        }
    }

    fn fhir_id(&mut self, id: &str, span: Span) {
        if !FHIR_ID.is_match(id) {
            let d = self.error(
                format!("Invalid FHIR id '{id}'."),
                span,
                DiagnosticCode::InvalidFhirId,
            );
            d.payload = Some(Payload::ReplacementSuggestion {
                original: id.to_owned(),
                suggestion: fhirise_id(id),
            });
        }
    }

    // -- Resources --------------------------------------------------------------

    fn resource(&mut self, resource: &mut Resource) {
        self.fhir_id(&resource.id, resource.span);

        let mut validator = self.validator;
        if let Some(v) = validator {
            match v.validate_resource(&resource.resource_type) {
                Ok(true) => {}
                Ok(false) => {
                    self.error(
                        format!("Invalid FHIR resource type '{}'.", resource.resource_type),
                        resource.span,
                        DiagnosticCode::InvalidFhirResource,
                    );
                    validator = None;
                }
                Err(e) => {
                    self.warning(e.to_string(), resource.span, DiagnosticCode::ValidatorUnavailable);
                    validator = None;
                }
            }
        }

        for av in &mut resource.attributes {
            self.value(&mut av.value, av.span);
            self.index_bounds(av);
            if let Some(v) = validator {
                self.path(v, &resource.resource_type, av);
            }
        }
    }

    fn value(&mut self, value: &mut Value, span: Span) {
        if let Some(id) = value.field_id().map(str::to_owned) {
            self.field_id(&id, span);
            self.compatibility(&id, value, span);
        }
        match value {
            Value::Field {
                precision: Some(p), ..
            } => {
                if let Err(message) = p.parse::<DatePrecision>() {
                    self.error(message, span, DiagnosticCode::InvalidDatePrecision);
                }
            }
            Value::Reference { resource_type, id } => {
                let (resource_type, id) = (resource_type.clone(), id.clone());
                self.reference(&resource_type, &id, span);
            }
            Value::ConceptLiteral { system, .. } if system.starts_with('$') => {
                if let Some(resolved) = self.alias(system, span) {
                    *system = resolved;
                }
            }
            _ => {}
        }
    }

    fn compatibility(&mut self, id: &str, value: &Value, span: Span) {
        let Some(field) = self.schema.and_then(|s| s.field(id)) else {
            return;
        };
        let mut issues = Vec::new();
        if !field.is_compatible_with(value, &mut issues) {
            for issue in issues {
                self.error(issue, span, DiagnosticCode::IncompatibleExpression);
            }
            return;
        }
        if !field.needs_mapping(value) {
            return;
        }
        let options = field.options();
        let per_option = match value {
            Value::ConceptSelected(_) | Value::CodeSelected(_) => true,
            _ => !options.is_empty() && !field.is_multi_select(),
        };
        if per_option {
            for option in options {
                self.needed.entry(option.field_id().to_owned()).or_insert(span);
            }
        } else {
            self.needed.entry(id.to_owned()).or_insert(span);
        }
    }

    fn reference(&mut self, resource_type: &str, id: &str, span: Span) {
        if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) {
            self.error(
                format!("Invalid reference type '{resource_type}'."),
                span,
                DiagnosticCode::InvalidReferenceType,
            );
        }
        self.fhir_id(id, span);
        let key = ResourceKey::new(resource_type, id);
        if !self.created.contains(&key) {
            let d = self.error(
                format!("Resource {key} is referenced but is not created by any rule."),
                span,
                DiagnosticCode::UnknownFhirResource,
            );
            d.payload = Some(Payload::Identifier(key.to_string()));
        }
    }

    /// Resolve a `$ALIAS` code system. Reports and returns `None` when unknown.
    fn alias(&mut self, name: &str, span: Span) -> Option<String> {
        if let Some(url) = self.aliases.get(name) {
            return Some(url.clone());
        }
        let aliases = self.aliases;
        let suggestion = closest(name, aliases.keys().map(String::as_str)).map(str::to_owned);
        let d = self.error(format!("Unknown alias '{name}'."), span, DiagnosticCode::InvalidAlias);
        if let Some(suggestion) = suggestion {
            d.payload = Some(Payload::ReplacementSuggestion {
                original: name.to_owned(),
                suggestion,
            });
        }
        None
    }

    // -- Attribute paths ----------------------------------------------------------

    fn index_bounds(&mut self, av: &AttributeValue) {
        for attr in &av.attributes {
            if let Some(index) = attr.index.filter(|i| *i > MAX_LIST_INDEX) {
                self.error(
                    format!(
                        "Index {index} of attribute '{}' is above the maximum of {MAX_LIST_INDEX}.",
                        attr.name
                    ),
                    av.span,
                    DiagnosticCode::InvalidFhirAttributeIndex,
                );
            }
        }
    }

    fn path(&mut self, validator: &dyn PathValidator, resource_type: &str, av: &mut AttributeValue) {
        let span = av.span;
        let mut prefix = resource_type.to_owned();
        let mut leaf: Option<PathInfo> = None;
        for attr in &mut av.attributes {
            prefix.push('.');
            prefix.push_str(&attr.name);
            let segment = split_extension(&prefix)
                .pop()
                .unwrap_or_else(|| prefix.clone());

            match validator.validate_path(&segment) {
                Ok(true) => {}
                Ok(false) => {
                    self.error(
                        format!("Invalid FHIR attribute path '{prefix}'."),
                        span,
                        DiagnosticCode::InvalidFhirAttributePath,
                    );
                    return;
                }
                Err(e) => {
                    self.warning(e.to_string(), span, DiagnosticCode::ValidatorUnavailable);
                    return;
                }
            }

            leaf = match validator.lookup(&segment) {
                Ok(Some(info)) => {
                    attr.is_list = info.is_list();
                    if info.is_prohibited() {
                        self.error(
                            format!("Attribute '{prefix}' is not allowed (maximum cardinality is 0)."),
                            span,
                            DiagnosticCode::FhirAttributeNotAllowed,
                        );
                        return;
                    }
                    if let (Some(index), Some(max)) = (attr.index, info.max_cardinality()) {
                        if index >= max {
                            self.error(
                                format!(
                                    "Index {index} of attribute '{prefix}' is out of range \
                                     (maximum cardinality is {max})."
                                ),
                                span,
                                DiagnosticCode::InvalidFhirAttributeIndex,
                            );
                        }
                    }
                    if info.extension_url.is_some() {
                        attr.extension_url.clone_from(&info.extension_url);
                    }
                    Some(info)
                }
                Ok(None) => None,
                Err(e) => {
                    self.warning(e.to_string(), span, DiagnosticCode::ValidatorUnavailable);
                    return;
                }
            };
        }

        if let Some(info) = leaf {
            av.value_type = info.fhir_type;
            av.target_profiles = info.target_profiles;
            self.literal_type(av, &prefix);
        }
    }

    fn literal_type(&mut self, av: &AttributeValue, path: &str) {
        let Some(ty) = av.value_type.as_deref() else {
            return;
        };
        let span = av.span;
        let compatible = match &av.value {
            Value::Boolean(_) => ty == "boolean",
            Value::String(s) => {
                let ok = STRING_TYPES.contains(&ty);
                if ok {
                    self.string_format(ty, s, span);
                }
                ok
            }
            Value::Integer(_) => INTEGER_TYPES.contains(&ty),
            Value::Decimal(_) => ty == "decimal",
            Value::CodeLiteral(_) | Value::CodeSelected(_) => ty == "code",
            Value::ConceptLiteral { .. } | Value::Concept(_) | Value::ConceptSelected(_) => {
                matches!(ty, "Coding" | "CodeableConcept" | "code")
            }
            Value::Reference { resource_type, .. } => {
                let ok = ty == "Reference";
                if ok {
                    self.reference_target(resource_type, &av.target_profiles, span);
                }
                ok
            }
            Value::Field { .. } => PrimitiveKind::from_fhir_type(ty).is_some(),
        };
        if !compatible {
            self.error(
                format!(
                    "A {} value cannot be assigned to attribute '{path}' of type {ty}.",
                    av.value.kind_name()
                ),
                span,
                DiagnosticCode::IncompatibleType,
            );
        }
    }

    fn string_format(&mut self, ty: &str, s: &str, span: Span) {
        let (valid, code) = match ty {
            "id" => (FHIR_ID.is_match(s), DiagnosticCode::InvalidFhirId),
            "uri" => (
                !s.is_empty() && !s.chars().any(char::is_whitespace),
                DiagnosticCode::InvalidUri,
            ),
            "url" => (url::Url::parse(s).is_ok(), DiagnosticCode::InvalidUrl),
            "uuid" => (
                s.strip_prefix("urn:uuid:")
                    .is_some_and(|u| uuid::Uuid::parse_str(u).is_ok()),
                DiagnosticCode::InvalidUuid,
            ),
            "canonical" => (
                s.split('|').next().is_some_and(|u| url::Url::parse(u).is_ok()),
                DiagnosticCode::InvalidCanonical,
            ),
            _ => return,
        };
        if !valid {
            self.error(format!("'{s}' is not a valid {ty}."), span, code);
        }
    }

    fn reference_target(&mut self, resource_type: &str, profiles: &[String], span: Span) {
        if profiles.is_empty() {
            return;
        }
        let allowed = profiles.iter().any(|p| {
            let name = p.rsplit('/').next().unwrap_or(p);
            name == resource_type || name == "Resource"
        });
        if !allowed {
            self.error(
                format!(
                    "A reference to {resource_type} is not allowed here. Allowed targets: {}.",
                    profiles.join(", ")
                ),
                span,
                DiagnosticCode::InvalidReferenceType,
            );
        }
    }

    // -- Mappings -------------------------------------------------------------------

    fn mapping_aliases(&mut self, mappings: &mut IndexMap<String, Mapping>) {
        for mapping in mappings.values_mut() {
            if mapping.target.system.starts_with('$') {
                if let Some(resolved) = self.alias(&mapping.target.system, mapping.span) {
                    mapping.target.system = resolved;
                }
            }
        }
    }

    fn mappings(&mut self, mappings: &IndexMap<String, Mapping>, section_present: bool) {
        let Some(schema) = self.schema else {
            return;
        };
        let mut needed = std::mem::take(&mut self.needed);

        for (id, mapping) in mappings {
            let Some(field) = schema.field(id) else {
                self.error(
                    format!("Mapping refers to field '{id}', which does not exist."),
                    mapping.span,
                    DiagnosticCode::MappedFieldDoesNotExist,
                );
                continue;
            };
            if let Some(label) = &mapping.label {
                if label != field.label() {
                    let d = self.warning(
                        format!(
                            "The label of field '{id}' is '{}', not '{label}'.",
                            field.label()
                        ),
                        mapping.span,
                        DiagnosticCode::MappedFieldLabelMismatch,
                    );
                    d.payload = Some(Payload::LabeledField {
                        field_id: id.clone(),
                        label: field.label().to_owned(),
                    });
                }
            }
            if needed.shift_remove(id).is_none() {
                self.warning(
                    format!("The mapping for field '{id}' is not needed."),
                    mapping.span,
                    DiagnosticCode::MappingNotNeeded,
                );
            }
        }

        for (id, span) in needed {
            let label = schema.field(&id).map(|f| f.label().to_owned()).unwrap_or_default();
            let d = if section_present {
                self.error(
                    format!("Field '{id}' requires a mapping."),
                    span,
                    DiagnosticCode::MappingMissing,
                )
            } else {
                self.error(
                    format!("Field '{id}' requires a mapping but there is no MAPPINGS section."),
                    span,
                    DiagnosticCode::MappingAndSectionMissing,
                )
            };
            d.payload = Some(Payload::LabeledField { field_id: id, label });
        }
    }
}
