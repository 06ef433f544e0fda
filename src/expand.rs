use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::{
    Body, Diagnostic, DiagnosticCode, Document, Payload, Resource, Rule, Span, Value,
};

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$][{]([a-zA-Z0-9_]+)[}]").expect("static variable pattern"));

type Bindings = Vec<(String, i64)>;

struct Problem {
    message: String,
    code: DiagnosticCode,
    payload: Option<Payload>,
    span: Span,
}

struct Expander {
    problems: Vec<Problem>,
}

/// Unroll every `REPEAT(start..end: var)` into sibling copies of its rule and
/// substitute `${var}` in field ids, resource ids and list indices.
///
/// Expanded rules carry no `REPEAT`, so running this twice is a no-op.
/// `start > end` yields zero copies. A placeholder naming no enclosing
/// variable is reported and replaced by `0`.
pub fn expand(doc: &mut Document) {
    let before = doc.rules.len();
    let mut expander = Expander { problems: Vec::new() };
    let rules = std::mem::take(&mut doc.rules);
    doc.rules = expander.rules(rules, &Vec::new());

    for problem in expander.problems {
        let range = doc.range(problem.span);
        let mut diagnostic =
            Diagnostic::error(problem.message, range, "expand").with_code(problem.code);
        diagnostic.payload = problem.payload;
        doc.push_diagnostic(diagnostic);
    }
    tracing::debug!(before, after = doc.rules.len(), "expanded REPEAT rules");
}

impl Expander {
    fn rules(&mut self, rules: Vec<Rule>, bindings: &Bindings) -> Vec<Rule> {
        let mut out = Vec::with_capacity(rules.len());
        for mut rule in rules {
            match rule.repeat.take() {
                None => out.push(self.rule(rule, bindings)),
                Some(repeat) => {
                    for i in repeat.start..=repeat.end {
                        let mut scoped = bindings.clone();
                        scoped.retain(|(name, _)| *name != repeat.var);
                        scoped.push((repeat.var.clone(), i));
                        out.push(self.rule(rule.clone(), &scoped));
                    }
                }
            }
        }
        out
    }

    fn rule(&mut self, mut rule: Rule, bindings: &Bindings) -> Rule {
        let span = rule.condition.span;
        rule.condition
            .map_field_ids(&mut |id| self.bind(id, bindings, span));
        rule.body = self.body(rule.body, bindings);
        rule.else_body = rule.else_body.map(|b| self.body(b, bindings));
        rule
    }

    fn body(&mut self, body: Body, bindings: &Bindings) -> Body {
        let resources = body
            .resources
            .into_iter()
            .map(|r| self.resource(r, bindings))
            .collect();
        let rules = self.rules(body.rules, bindings);
        Body { resources, rules }
    }

    fn resource(&mut self, mut resource: Resource, bindings: &Bindings) -> Resource {
        self.bind(&mut resource.id, bindings, resource.span);
        for av in &mut resource.attributes {
            let span = av.span;
            if let Some(id) = av.value.field_id_mut() {
                self.bind(id, bindings, span);
            }
            if let Value::Reference { id, .. } = &mut av.value {
                self.bind(id, bindings, span);
            }
            for attr in &mut av.attributes {
                if let Some(mut template) = attr.index_template.take() {
                    self.bind(&mut template, bindings, span);
                    match template.parse::<usize>() {
                        Ok(i) => attr.index = Some(i),
                        Err(_) => self.problems.push(Problem {
                            message: format!(
                                "Index '{template}' of attribute '{}' is not a valid list position.",
                                attr.name
                            ),
                            code: DiagnosticCode::InvalidFhirAttributeIndex,
                            payload: None,
                            span,
                        }),
                    }
                }
            }
        }
        resource
    }

    fn bind(&mut self, text: &mut String, bindings: &Bindings, span: Span) {
        if !text.contains("${") {
            return;
        }
        let original = text.clone();
        let replaced = VARIABLE.replace_all(text, |caps: &Captures<'_>| -> Cow<'static, str> {
            let name = &caps[1];
            match bindings.iter().rev().find(|(n, _)| n == name) {
                Some((_, v)) => Cow::Owned(v.to_string()),
                None => {
                    self.problems.push(Problem {
                        message: format!("Unknown variable '{name}' in '{original}'."),
                        code: DiagnosticCode::UnknownVariable,
                        payload: Some(Payload::Identifier(name.to_owned())),
                        span,
                    });
                    Cow::Borrowed("0")
                }
            }
        });
        *text = replaced.into_owned();
    }
}
