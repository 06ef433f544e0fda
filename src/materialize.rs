//! Row materialization.
//!
//! Given a compiled [`Document`], its [`Resolution`] and the source rows, a
//! [`Materializer`] decides which rules fire for each row, resolves every
//! attribute value against the row and accumulates the results into linked
//! JSON records.
//!
//! Shared resources are built first, sequentially and in row order, into
//! write-once cells: the first row that fires a contributing rule wins. Per-row
//! resources are built afterwards and may run in parallel, since each row only
//! reads the shared cells.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::accumulate::{RecordBuilder, MAX_LIST_INDEX};
use crate::config::TransformConfig;
use crate::evaluate::{eval, is_present};
use crate::graph::Resolution;
use crate::progress::{CancelToken, Progress, ProgressReporter, Stage};
use crate::row::Row;
use crate::schema::{Field, FieldError, PrimitiveKind, Schema, TypedValue};
use crate::types::{
    AttributeValue, Coding, Diagnostic, DiagnosticCode, Document, Payload, Range, Resource,
    ResourceKey, Rule, Value,
};

const SOURCE: &str = "transform";

/// Reasons a transformation cannot start at all.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("document has compilation errors and cannot be transformed")]
    DocumentHasErrors,

    #[error("resource graph is unresolved: {0}")]
    UnresolvedGraph(String),

    #[error("schema has no fields to identify records with")]
    NoUniqueField,

    #[error("could not start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Output of one transformation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Materialized {
    /// Shared records first, in creation order, then each row's records.
    pub records: Vec<Json>,
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the run stopped early. `records` holds what was produced.
    pub cancelled: bool,
}

impl Materialized {
    /// A run with only warnings counts as a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && !crate::types::has_errors(&self.diagnostics)
    }

    pub fn records_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Json> {
        self.records
            .iter()
            .filter(move |r| r["resourceType"] == resource_type)
    }
}

// -- Value resolution ------------------------------------------------------

/// Why an attribute was skipped.
#[derive(Debug)]
enum Unresolved {
    /// The row has no data for the field.
    Missing(String),
    /// A reference to a record this row did not produce.
    Dangling(String),
    Failed(String),
}

fn coding_json(coding: &Coding) -> Json {
    let mut obj = Map::new();
    obj.insert("system".to_owned(), Json::String(coding.system.clone()));
    obj.insert("code".to_owned(), Json::String(coding.code.clone()));
    if let Some(display) = &coding.display {
        obj.insert("display".to_owned(), Json::String(display.clone()));
    }
    Json::Object(obj)
}

/// Shape a concept by the target type. Unknown types get a CodeableConcept.
fn concept_json(coding: &Coding, target: Option<&str>) -> Json {
    match target {
        Some("Coding") => coding_json(coding),
        Some("code" | "string" | "uri") => Json::String(coding.code.clone()),
        _ => json!({ "coding": [coding_json(coding)] }),
    }
}

fn reference_json(resource_type: &str, id: &str) -> Json {
    json!({ "reference": format!("{resource_type}/{id}") })
}

/// Per-row id of a per-row record.
fn scoped_id(id: &str, record_id: &str) -> String {
    format!("{id}-{record_id}")
}

// -- Materializer ----------------------------------------------------------

/// A fired resource statement and the object (primary row or repeat
/// instance) its rule fired on.
#[derive(Clone, Copy)]
struct Fired<'d, 'r> {
    resource: &'d Resource,
    object: &'r Row,
}

type SharedCells = HashMap<ResourceKey, OnceCell<Json>>;

/// What a record being built may reference.
struct Scope<'s> {
    /// `None` while building shared records.
    record_id: Option<&'s str>,
    produced: &'s HashSet<ResourceKey>,
    shared: &'s SharedCells,
}

struct Job<'r> {
    index: usize,
    row: &'r Row,
    record_id: &'r str,
}

#[derive(Default)]
struct RowOutput {
    records: Vec<Json>,
    diagnostics: Vec<Diagnostic>,
}

/// Builds output records from source rows.
///
/// A materializer borrows everything it needs and holds no per-run state, so
/// one instance can serve several runs, including from several threads.
///
/// ```ignore
/// let doc = Compiler::new().with_schema(&schema).compile(source);
/// let resolution = resolve_graph(&doc);
/// let out = Materializer::new(&doc, &schema, &resolution).run(&rows)?;
/// ```
#[must_use]
pub struct Materializer<'a> {
    doc: &'a Document,
    schema: &'a Schema,
    resolution: &'a Resolution,
    config: TransformConfig,
    progress: Option<&'a dyn ProgressReporter>,
    cancel: Option<CancelToken>,
}

impl<'a> Materializer<'a> {
    pub fn new(doc: &'a Document, schema: &'a Schema, resolution: &'a Resolution) -> Self {
        Self {
            doc,
            schema,
            resolution,
            config: TransformConfig::default(),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: TransformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Transform `rows`.
    ///
    /// Problems with individual rows or attributes become diagnostics in the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the document has errors, the graph was
    /// not resolved, the schema is empty or a dedicated worker pool cannot be
    /// started.
    pub fn run(&self, rows: &[Row]) -> Result<Materialized, TransformError> {
        if self.doc.has_errors() {
            return Err(TransformError::DocumentHasErrors);
        }
        if let Some(d) = self.resolution.diagnostics.iter().find(|d| d.is_error()) {
            return Err(TransformError::UnresolvedGraph(d.message.clone()));
        }
        let unique = self
            .schema
            .unique_field_id()
            .ok_or(TransformError::NoUniqueField)?;

        self.report(Stage::Start, 0, format!("Transforming {} rows", rows.len()));
        let mut out = Materialized::default();

        let mut jobs = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match row.non_empty(unique) {
                Some(record_id) => jobs.push(Job {
                    index,
                    row,
                    record_id,
                }),
                None => {
                    warn!(row = index, unique, "row has no record id, skipping");
                    out.diagnostics.push(
                        Diagnostic::error(
                            format!("Row {index} has no value for the unique field '{unique}'."),
                            Range::default(),
                            SOURCE,
                        )
                        .with_code(DiagnosticCode::Transform)
                        .with_payload(Payload::Identifier(unique.to_owned())),
                    );
                }
            }
        }

        let shared: SharedCells = self
            .resolution
            .shared
            .iter()
            .map(|k| (k.clone(), OnceCell::new()))
            .collect();

        self.report(Stage::Progress, 10, "Building shared resources");
        for job in &jobs {
            if shared.values().all(|cell| cell.get().is_some()) {
                break;
            }
            if self.is_cancelled() {
                out.cancelled = true;
                break;
            }
            self.build_shared(job, &shared, &mut out.diagnostics);
        }
        for key in &self.resolution.order {
            if let Some(record) = shared.get(key).and_then(OnceCell::get) {
                out.records.push(record.clone());
            }
        }

        if !out.cancelled {
            self.report(Stage::Progress, 20, "Building per-row resources");
            let collected = Mutex::new(Vec::with_capacity(jobs.len()));
            let work = |job: &Job<'_>| {
                if self.is_cancelled() {
                    return;
                }
                let output = self.build_row(job, &shared);
                collected.lock().push((job.index, output));
            };
            if self.config.parallel {
                match self.config.worker_threads {
                    Some(threads) => {
                        let pool = rayon::ThreadPoolBuilder::new()
                            .num_threads(threads)
                            .build()?;
                        pool.install(|| jobs.par_iter().for_each(&work));
                    }
                    None => jobs.par_iter().for_each(&work),
                }
            } else {
                jobs.iter().for_each(&work);
            }

            let mut outputs = collected.into_inner();
            if outputs.len() < jobs.len() {
                out.cancelled = true;
            }
            outputs.sort_by_key(|(index, _)| *index);
            for (_, output) in outputs {
                out.records.extend(output.records);
                out.diagnostics.extend(output.diagnostics);
            }
        }

        info!(
            rows = rows.len(),
            records = out.records.len(),
            diagnostics = out.diagnostics.len(),
            cancelled = out.cancelled,
            "materialized rows"
        );
        let message = if out.cancelled { "Cancelled" } else { "Done" };
        self.report(Stage::End, 100, message);
        Ok(out)
    }

    fn report(&self, stage: Stage, percentage: u8, message: impl Into<String>) {
        if let Some(reporter) = self.progress {
            reporter.report(Progress::new(stage, percentage, message));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Fired statements of one row grouped by resource, in document order.
    /// Each object is evaluated on its own.
    fn fired<'r>(&self, row: &'r Row) -> IndexMap<ResourceKey, Vec<Fired<'a, 'r>>> {
        let mut fired = Vec::new();
        for object in row.objects() {
            self.fire(&self.doc.rules, object, &mut fired);
        }
        let mut grouped: IndexMap<ResourceKey, Vec<Fired<'a, 'r>>> = IndexMap::new();
        for f in fired {
            grouped.entry(f.resource.key()).or_default().push(f);
        }
        grouped
    }

    fn fire<'r>(&self, rules: &'a [Rule], object: &'r Row, out: &mut Vec<Fired<'a, 'r>>) {
        for rule in rules {
            let body = if eval(&rule.condition, object, Some(self.schema)) {
                Some(&rule.body)
            } else {
                rule.else_body.as_ref()
            };
            if let Some(body) = body {
                out.extend(body.resources.iter().map(|resource| Fired { resource, object }));
                self.fire(&body.rules, object, out);
            }
        }
    }

    fn build_shared(&self, job: &Job<'_>, shared: &SharedCells, diagnostics: &mut Vec<Diagnostic>) {
        let fired = self.fired(job.row);
        let produced = HashSet::new();
        for key in &self.resolution.order {
            let Some(cell) = shared.get(key) else {
                continue;
            };
            if cell.get().is_some() {
                continue;
            }
            let Some(statements) = fired.get(key) else {
                continue;
            };
            let scope = Scope {
                record_id: None,
                produced: &produced,
                shared,
            };
            let builder = self.build(key, &key.id, statements, &scope, diagnostics);
            if builder.is_empty() {
                continue;
            }
            debug!(resource = %key, row = job.index, "built shared resource");
            // Cells are only filled here, sequentially.
            let _ = cell.set(builder.into_json(self.config.prune_empty_list_entries));
        }
    }

    fn build_row(&self, job: &Job<'_>, shared: &SharedCells) -> RowOutput {
        let fired = self.fired(job.row);
        let mut produced = HashSet::new();
        let mut output = RowOutput::default();
        for key in &self.resolution.order {
            if self.resolution.is_shared(key) {
                continue;
            }
            let Some(statements) = fired.get(key) else {
                continue;
            };
            let id = scoped_id(&key.id, job.record_id);
            let scope = Scope {
                record_id: Some(job.record_id),
                produced: &produced,
                shared,
            };
            let builder = self.build(key, &id, statements, &scope, &mut output.diagnostics);
            if builder.is_empty() {
                debug!(resource = %key, record = job.record_id, "no attributes resolved, omitting");
                continue;
            }
            produced.insert(key.clone());
            output
                .records
                .push(builder.into_json(self.config.prune_empty_list_entries));
        }
        output
    }

    fn build(
        &self,
        key: &ResourceKey,
        id: &str,
        statements: &[Fired<'a, '_>],
        scope: &Scope<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> RecordBuilder {
        let mut builder = RecordBuilder::new(&key.resource_type, id);
        for fired in statements {
            for av in &fired.resource.attributes {
                match self.resolve(av, fired.object, scope) {
                    Ok(value) => {
                        if !builder.write(&av.attributes, value) {
                            let message =
                                format!("List index is above the maximum of {MAX_LIST_INDEX}.");
                            diagnostics.push(self.diagnostic(true, scope, &message, av));
                        }
                    }
                    Err(Unresolved::Missing(message)) => {
                        if self.config.report_missing_values {
                            diagnostics.push(self.diagnostic(false, scope, &message, av));
                        }
                    }
                    Err(Unresolved::Dangling(message)) => {
                        diagnostics.push(self.diagnostic(false, scope, &message, av));
                    }
                    Err(Unresolved::Failed(message)) => {
                        diagnostics.push(self.diagnostic(true, scope, &message, av));
                    }
                }
            }
        }
        builder
    }

    fn diagnostic(&self, error: bool, scope: &Scope<'_>, message: &str, av: &AttributeValue) -> Diagnostic {
        let message = match scope.record_id {
            Some(record_id) => format!("Record '{record_id}', {av}: {message}"),
            None => format!("Shared resource, {av}: {message}"),
        };
        let range = self.doc.range(av.span);
        let d = if error {
            Diagnostic::error(message, range, SOURCE)
        } else {
            Diagnostic::warning(message, range, SOURCE)
        };
        d.with_code(DiagnosticCode::Transform)
    }

    fn field(&self, field_id: &str) -> Result<&'a dyn Field, Unresolved> {
        self.schema
            .field(field_id)
            .ok_or_else(|| Unresolved::Failed(format!("Unknown field '{field_id}'.")))
    }

    fn present(&self, field_id: &str, object: &Row) -> Result<(), Unresolved> {
        if is_present(field_id, object, Some(self.schema)) {
            Ok(())
        } else {
            Err(Unresolved::Missing(format!("Field '{field_id}' has no value.")))
        }
    }

    fn resolve(&self, av: &AttributeValue, object: &Row, scope: &Scope<'_>) -> Result<Json, Unresolved> {
        let target = av.value_type.as_deref();
        match &av.value {
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Boolean(b) => Ok(Json::Bool(*b)),
            Value::Integer(i) => Ok(Json::from(*i)),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .ok_or_else(|| Unresolved::Failed(format!("{d} is not a finite decimal."))),
            Value::CodeLiteral(code) => Ok(Json::String(code.clone())),
            Value::ConceptLiteral {
                system,
                code,
                display,
            } => {
                let coding = Coding {
                    system: system.clone(),
                    code: code.clone(),
                    display: display.clone(),
                };
                Ok(concept_json(&coding, target))
            }
            Value::Reference { resource_type, id } => {
                self.reference(&ResourceKey::new(resource_type, id), scope)
            }
            Value::Field { field_id, .. } => {
                let field = self.field(field_id)?;
                self.present(field_id, object)?;
                let kind = target
                    .and_then(PrimitiveKind::from_fhir_type)
                    .unwrap_or_else(|| field.natural_kind());
                field
                    .value(object, kind, av.value.date_precision())
                    .and_then(TypedValue::into_json)
                    .map_err(|e| match e {
                        FieldError::Missing(_) => Unresolved::Missing(e.to_string()),
                        other => Unresolved::Failed(other.to_string()),
                    })
            }
            Value::Concept(field_id) => {
                let field = self.field(field_id)?;
                self.present(field_id, object)?;
                let mappings = &self.doc.mappings;
                let coding = field
                    .coding(object)
                    .or_else(|| {
                        field
                            .find_selected_mapping(mappings, object)
                            .or_else(|| field.find_mapping(mappings))
                            .map(|m| m.target.clone())
                    })
                    .ok_or_else(|| {
                        Unresolved::Failed(format!("No mapping found for field '{field_id}'."))
                    })?;
                Ok(concept_json(&coding, target))
            }
            Value::ConceptSelected(field_id) | Value::CodeSelected(field_id) => {
                let field = self.field(field_id)?;
                self.present(field_id, object)?;
                let mapping = field
                    .find_selected_mapping(&self.doc.mappings, object)
                    .ok_or_else(|| {
                        Unresolved::Failed(format!(
                            "No mapping found for the selected option of field '{field_id}'."
                        ))
                    })?;
                if matches!(av.value, Value::CodeSelected(_)) {
                    Ok(Json::String(mapping.target.code.clone()))
                } else {
                    Ok(concept_json(&mapping.target, target))
                }
            }
        }
    }

    fn reference(&self, target: &ResourceKey, scope: &Scope<'_>) -> Result<Json, Unresolved> {
        if self.resolution.is_shared(target) {
            return if scope.shared.get(target).is_some_and(|c| c.get().is_some()) {
                Ok(reference_json(&target.resource_type, &target.id))
            } else {
                Err(Unresolved::Dangling(format!(
                    "Referenced resource {target} has not been created."
                )))
            };
        }
        match scope.record_id {
            Some(record_id) if scope.produced.contains(target) => Ok(reference_json(
                &target.resource_type,
                &scoped_id(&target.id, record_id),
            )),
            _ => Err(Unresolved::Dangling(format!(
                "Referenced resource {target} was not created for this row."
            ))),
        }
    }
}

/// Transform `rows` with the default configuration.
///
/// # Errors
///
/// See [`Materializer::run`].
pub fn materialize(
    doc: &Document,
    schema: &Schema,
    resolution: &Resolution,
    rows: &[Row],
) -> Result<Materialized, TransformError> {
    Materializer::new(doc, schema, resolution).run(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use crate::graph::resolve_graph;
    use crate::schema::{FieldType, RedcapField, TextValidation};
    use crate::types::{Attribute, Severity};

    fn schema() -> Schema {
        Schema::redcap(vec![
            RedcapField::text("record_id", "Record ID", TextValidation::None),
            RedcapField::new("pat_sex", "Sex", FieldType::Radio)
                .with_option("1", "Male")
                .with_option("2", "Female"),
            RedcapField::text("dob", "Date of birth", TextValidation::DateYmd),
            RedcapField::text("weight", "Weight", TextValidation::Number),
            RedcapField::text("dx_code", "Diagnosis", TextValidation::FhirTerminology),
            RedcapField::text("note", "Note", TextValidation::None),
        ])
    }

    fn run(source: &str, rows: &[Row]) -> Materialized {
        let schema = schema();
        let doc = Compiler::new().with_schema(&schema).compile(source);
        assert!(!doc.has_errors(), "{:?}", doc.diagnostics);
        let resolution = resolve_graph(&doc);
        Materializer::new(&doc, &schema, &resolution)
            .with_config(TransformConfig {
                parallel: false,
                ..TransformConfig::default()
            })
            .run(rows)
            .unwrap()
    }

    #[test]
    fn per_row_records_get_scoped_ids() {
        let out = run(
            "NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }",
            &[
                Row::new().set("record_id", "1").set("dob", "2000-01-02"),
                Row::new().set("record_id", "2").set("dob", "1990-05-06"),
            ],
        );
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0]["id"], "p-1");
        assert_eq!(out.records[1]["birthDate"], "1990-05-06");
        assert!(out.is_success());
    }

    #[test]
    fn shared_record_built_once() {
        let out = run(
            "TRUE { Organization<org>: * name = 'Clinic' }",
            &[Row::new().set("record_id", "1"), Row::new().set("record_id", "2")],
        );
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["id"], "org");
        assert_eq!(out.records[0]["name"], "Clinic");
    }

    #[test]
    fn shared_record_fixed_by_first_productive_row() {
        let out = run(
            "VALUE(pat_sex) = 1 { Organization<org>: * name = 'Male clinic' }
             VALUE(pat_sex) = 2 { Organization<org>: * name = 'Female clinic' }",
            &[
                Row::new().set("record_id", "1"),
                Row::new().set("record_id", "2").set("pat_sex", "2"),
                Row::new().set("record_id", "3").set("pat_sex", "1"),
            ],
        );
        assert_eq!(
            out.records,
            vec![json!({"resourceType": "Organization", "id": "org", "name": "Female clinic"})]
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    }

    #[test]
    fn index_above_cap_skips_attribute() {
        let schema = schema();
        // Parsed only, so the compiler's index check is bypassed.
        let doc = crate::parse::parse("TRUE { Patient<p>: * active = TRUE * identifier[5000].value = 'x' }");
        let resolution = resolve_graph(&doc);
        let out = Materializer::new(&doc, &schema, &resolution)
            .run(&[Row::new().set("record_id", "1")])
            .unwrap();
        assert_eq!(
            out.records,
            vec![json!({"resourceType": "Patient", "id": "p", "active": true})]
        );
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Severity::Error);
        assert!(out.diagnostics[0].message.contains("maximum of 1000"));
    }

    #[test]
    fn references_resolve_to_scoped_and_shared_ids() {
        let out = run(
            "TRUE { Organization<org>: * name = 'Clinic' }
             NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) * managingOrganization = REF(Organization<org>) }
             NOTNULL(weight) { Observation<o>: * subject = REF(Patient<p>) * valueQuantity.value = VALUE(weight) }",
            &[Row::new()
                .set("record_id", "7")
                .set("dob", "2000-01-02")
                .set("weight", "70.5")],
        );
        let patient = out.records_of_type("Patient").next().unwrap();
        assert_eq!(patient["managingOrganization"]["reference"], "Organization/org");
        let obs = out.records_of_type("Observation").next().unwrap();
        assert_eq!(obs["subject"]["reference"], "Patient/p-7");
        assert_eq!(obs["valueQuantity"]["value"], 70.5);
    }

    #[test]
    fn missing_reference_target_in_row_is_warning() {
        let out = run(
            "NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }
             NOTNULL(weight) { Observation<o>: * subject = REF(Patient<p>) * valueString = VALUE(weight) }",
            &[Row::new().set("record_id", "1").set("weight", "3")],
        );
        assert_eq!(out.records.len(), 1);
        assert!(out.records[0].get("subject").is_none());
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("Patient<p>")));
        assert!(out.is_success());
    }

    #[test]
    fn missing_record_id_skips_row() {
        let out = run(
            "NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }",
            &[Row::new().set("dob", "2000-01-02")],
        );
        assert!(out.records.is_empty());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code, Some(DiagnosticCode::Transform));
        assert!(!out.is_success());
    }

    #[test]
    fn coercion_failure_skips_attribute_only() {
        let out = run(
            "TRUE { Patient<p>: * birthDate = VALUE(dob) * gender = CODE_LITERAL(male) }",
            &[Row::new().set("record_id", "1").set("dob", "yesterday")],
        );
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["gender"], "male");
        assert!(out.records[0].get("birthDate").is_none());
        assert!(out.diagnostics.iter().any(Diagnostic::is_error));
    }

    #[test]
    fn missing_values_can_be_silenced() {
        let schema = schema();
        let doc = Compiler::new()
            .with_schema(&schema)
            .compile("TRUE { Patient<p>: * birthDate = VALUE(dob) * active = TRUE }");
        let resolution = resolve_graph(&doc);
        let rows = [Row::new().set("record_id", "1")];
        let loud = Materializer::new(&doc, &schema, &resolution).run(&rows).unwrap();
        assert_eq!(loud.diagnostics.len(), 1);
        let quiet = Materializer::new(&doc, &schema, &resolution)
            .with_config(TransformConfig {
                report_missing_values: false,
                ..TransformConfig::default()
            })
            .run(&rows)
            .unwrap();
        assert!(quiet.diagnostics.is_empty());
        assert_eq!(quiet.records[0]["active"], true);
    }

    #[test]
    fn resource_without_resolved_attributes_is_omitted() {
        let out = run(
            "TRUE { Patient<p>: * birthDate = VALUE(dob) }",
            &[Row::new().set("record_id", "1")],
        );
        assert!(out.records.is_empty());
    }

    #[test]
    fn vocabulary_field_concept() {
        let out = run(
            "NOTNULL(dx_code) { Condition<c>: * code = CONCEPT(dx_code) }",
            &[Row::new()
                .set("record_id", "1")
                .set("dx_code", "38341003|Hypertension|http://snomed.info/sct")],
        );
        assert_eq!(
            out.records[0]["code"],
            json!({"coding": [{"system": "http://snomed.info/sct", "code": "38341003", "display": "Hypertension"}]})
        );
    }

    #[test]
    fn selected_option_mapping() {
        let out = run(
            "NOTNULL(pat_sex) { Patient<p>: * gender = CODE_SELECTED(pat_sex) }
             MAPPINGS: {
               pat_sex___1 -> http://hl7.org/fhir/administrative-gender|male;
               pat_sex___2 -> http://hl7.org/fhir/administrative-gender|female;
             }",
            &[Row::new().set("record_id", "1").set("pat_sex", "2")],
        );
        assert_eq!(out.records[0]["gender"], "female");
    }

    #[test]
    fn else_branch_fires_when_condition_fails() {
        let out = run(
            "VALUE(pat_sex) = 1 { Patient<p>: * gender = CODE_LITERAL(male) }
             ELSE { Patient<p>: * gender = CODE_LITERAL(other) }",
            &[Row::new().set("record_id", "1").set("pat_sex", "2")],
        );
        assert_eq!(out.records[0]["gender"], "other");
    }

    #[test]
    fn repeat_instances_evaluated_independently() {
        let out = run(
            "NOTNULL(note) { Observation<o>: * valueString = VALUE(note) }",
            &[Row::new()
                .set("record_id", "1")
                .repeat(Row::new().set("note", "first"))
                .repeat(Row::new().set("note", "second"))],
        );
        // Both instances write the same singular path; the last one wins.
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["valueString"], "second");
    }

    #[test]
    fn concept_shape_follows_target_type() {
        let coding = Coding::new("s", "c");
        assert_eq!(concept_json(&coding, Some("Coding")), json!({"system": "s", "code": "c"}));
        assert_eq!(concept_json(&coding, Some("code")), json!("c"));
        assert_eq!(concept_json(&coding, None)["coding"][0]["code"], "c");
    }

    #[test]
    fn cancelled_before_start() {
        let schema = schema();
        let doc = Compiler::new()
            .with_schema(&schema)
            .compile("NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }");
        let resolution = resolve_graph(&doc);
        let token = CancelToken::new();
        token.cancel();
        let out = Materializer::new(&doc, &schema, &resolution)
            .with_cancel(token)
            .run(&[Row::new().set("record_id", "1").set("dob", "2000-01-01")])
            .unwrap();
        assert!(out.cancelled);
        assert!(out.records.is_empty());
        assert!(!out.is_success());
    }

    #[test]
    fn progress_reports_phase_boundaries() {
        let schema = schema();
        let doc = Compiler::new().with_schema(&schema).compile("TRUE { Patient<p>: * active = TRUE }");
        let resolution = resolve_graph(&doc);
        let stages = Mutex::new(Vec::new());
        let reporter = |p: Progress| stages.lock().push(p.stage);
        Materializer::new(&doc, &schema, &resolution)
            .with_progress(&reporter)
            .run(&[Row::new().set("record_id", "1")])
            .unwrap();
        let stages = stages.into_inner();
        assert_eq!(stages.first(), Some(&Stage::Start));
        assert_eq!(stages.last(), Some(&Stage::End));
    }

    #[test]
    fn documents_with_errors_are_rejected() {
        let schema = schema();
        let doc = Compiler::new()
            .with_schema(&schema)
            .compile("NOTNULL(nope) { Patient<p>: * active = TRUE }");
        let resolution = resolve_graph(&doc);
        assert!(matches!(
            materialize(&doc, &schema, &resolution, &[]),
            Err(TransformError::DocumentHasErrors)
        ));
    }

    #[test]
    fn explicit_list_attributes_accumulate() {
        let mut builder = RecordBuilder::new("Patient", "p");
        builder.write(&[Attribute::indexed("name", 0), Attribute::new("text")], json!("A"));
        assert_eq!(builder.into_json(true)["name"][0]["text"], "A");
    }
}
