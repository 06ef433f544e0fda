use serde::{Deserialize, Serialize};

use super::{Condition, Resource, Span};

/// Bounded iteration prefix, `REPEAT(start..end: var)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeat {
    pub start: i64,
    pub end: i64,
    pub var: String,
    pub span: Span,
}

impl Repeat {
    #[must_use]
    pub fn new(start: i64, end: i64, var: &str) -> Self {
        Self {
            start,
            end,
            var: var.to_owned(),
            span: Span::default(),
        }
    }
}

/// The statements of one branch of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub resources: Vec<Resource>,
    pub rules: Vec<Rule>,
}

impl Body {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.rules.is_empty()
    }

    /// Every resource statement in this body and all nested rules, both
    /// branches, in document order.
    pub fn collect_resources<'a>(&'a self, out: &mut Vec<&'a Resource>) {
        out.extend(self.resources.iter());
        for rule in &self.rules {
            rule.collect_resources(out);
        }
    }
}

/// A condition gating a body and an optional else body.
///
/// Nested rules in a body are only considered when the enclosing branch is
/// taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub repeat: Option<Repeat>,
    pub condition: Condition,
    pub body: Body,
    pub else_body: Option<Body>,
    pub span: Span,
}

impl Rule {
    #[must_use]
    pub fn new(condition: Condition) -> Self {
        Self {
            repeat: None,
            condition,
            body: Body::default(),
            else_body: None,
            span: Span::default(),
        }
    }

    /// Add a resource statement to the `then` branch.
    #[must_use]
    pub fn then(mut self, resource: Resource) -> Self {
        self.body.resources.push(resource);
        self
    }

    #[must_use]
    pub fn then_rule(mut self, rule: Rule) -> Self {
        self.body.rules.push(rule);
        self
    }

    /// Add a resource statement to the `else` branch.
    #[must_use]
    pub fn otherwise(mut self, resource: Resource) -> Self {
        self.else_body
            .get_or_insert_with(Body::default)
            .resources
            .push(resource);
        self
    }

    #[must_use]
    pub fn repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn collect_resources<'a>(&'a self, out: &mut Vec<&'a Resource>) {
        self.body.collect_resources(out);
        if let Some(else_body) = &self.else_body {
            else_body.collect_resources(out);
        }
    }

    /// Depth-first visit of this rule and every nested rule.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Rule)) {
        f(self);
        for r in &self.body.rules {
            r.walk(f);
        }
        if let Some(else_body) = &self.else_body {
            for r in &else_body.rules {
                r.walk(f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{value, AttributeValue, Value, path};

    #[test]
    fn collects_resources_from_both_branches() {
        let rule = Rule::new(value("pat_sex").eq(1_i64))
            .then(Resource::new("Patient", "p").attribute(AttributeValue::new(
                path("gender"),
                Value::CodeLiteral("male".into()),
            )))
            .otherwise(Resource::new("Patient", "q"))
            .then_rule(Rule::new(Condition::always()).then(Resource::new("Observation", "o")));

        let mut out = Vec::new();
        rule.collect_resources(&mut out);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p", "o", "q"]);
    }

    #[test]
    fn walk_visits_nested_rules() {
        let rule = Rule::new(Condition::always())
            .then_rule(Rule::new(Condition::never()).then_rule(Rule::new(Condition::always())));
        let mut count = 0;
        rule.walk(&mut |_| count += 1);
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_body() {
        assert!(Body::default().is_empty());
        assert!(!Rule::new(Condition::always())
            .then(Resource::new("Patient", "p"))
            .body
            .is_empty());
    }
}
