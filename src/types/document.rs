use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::{has_errors, Diagnostic, LineIndex, Range, Resource, Rule, Span};

/// A `system|code|display` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
}

impl Coding {
    #[must_use]
    pub fn new(system: &str, code: &str) -> Self {
        Self {
            system: system.to_owned(),
            code: code.to_owned(),
            display: None,
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: &str) -> Self {
        self.display = Some(display.to_owned());
        self
    }

    /// Returned for controlled-vocabulary values that cannot be decoded.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("http://redmatch.csiro.au", "unknown").with_display("unknown")
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.code)?;
        if let Some(d) = &self.display {
            write!(f, "|'{d}'")?;
        }
        Ok(())
    }
}

/// One `MAPPINGS` entry: a source field (or `field___option`) to a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub field_id: String,
    pub label: Option<String>,
    pub target: Coding,
    pub span: Span,
}

/// `SCHEMA: 'location' (KIND)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub location: String,
    pub kind: String,
}

/// A parsed rule document with its accumulated diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub schema: Option<SchemaRef>,
    pub server: Option<String>,
    pub aliases: IndexMap<String, String>,
    pub rules: Vec<Rule>,
    pub mappings: IndexMap<String, Mapping>,
    /// Whether the source had a `MAPPINGS` section at all, even an empty one.
    pub mappings_section_present: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub line_index: LineIndex,
}

impl Document {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            line_index: LineIndex::new(source),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn mapping(mut self, mapping: Mapping) -> Self {
        self.mappings_section_present = true;
        self.mappings.insert(mapping.field_id.clone(), mapping);
        self
    }

    #[must_use]
    pub fn range(&self, span: Span) -> Range {
        self.line_index.range(span)
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// Every resource statement in the document, in source order.
    #[must_use]
    pub fn resources(&self) -> Vec<&Resource> {
        let mut out = Vec::new();
        for rule in &self.rules {
            rule.collect_resources(&mut out);
        }
        out
    }

    /// Every rule, nested ones included, depth-first.
    #[must_use]
    pub fn all_rules(&self) -> Vec<&Rule> {
        let mut out = Vec::new();
        for rule in &self.rules {
            rule.walk(&mut |r| out.push(r));
        }
        out
    }

    /// Field ids the document reads from source data.
    ///
    /// With `exclude_options`, `x___1` is reported as `x`. `unique_field`, when
    /// given, is always first.
    #[must_use]
    pub fn referenced_fields(&self, exclude_options: bool, unique_field: Option<&str>) -> Vec<String> {
        let mut out: IndexSet<String> = IndexSet::new();
        if let Some(u) = unique_field {
            out.insert(u.to_owned());
        }
        let mut add = |id: &str| {
            let id = if exclude_options { strip_option_suffix(id) } else { id };
            if !out.contains(id) {
                out.insert(id.to_owned());
            }
        };
        for rule in self.all_rules() {
            for id in rule.condition.field_ids() {
                add(id);
            }
        }
        for resource in self.resources() {
            for av in &resource.attributes {
                if let Some(id) = av.value.field_id() {
                    add(id);
                }
            }
        }
        out.into_iter().collect()
    }
}

/// `x___1` → `x`. Ids without the option separator are returned unchanged.
#[must_use]
pub fn strip_option_suffix(field_id: &str) -> &str {
    match field_id.find("___") {
        Some(i) => &field_id[..i],
        None => field_id,
    }
}
