use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The right-hand side of an attribute assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    /// `CODE_LITERAL(code)`.
    CodeLiteral(String),
    /// `CONCEPT_LITERAL(system|code|'display')`. `system` may still be an
    /// unresolved `$ALIAS` before compilation.
    ConceptLiteral {
        system: String,
        code: String,
        display: Option<String>,
    },
    /// `REF(Type<id>)`.
    Reference { resource_type: String, id: String },
    /// `VALUE(field)` or `VALUE(field, PRECISION)`. The precision is kept as
    /// written; it is checked during compilation.
    Field {
        field_id: String,
        precision: Option<String>,
    },
    Concept(String),
    ConceptSelected(String),
    CodeSelected(String),
}

impl Value {
    /// True for values resolved from row data at materialization time.
    #[must_use]
    pub fn is_field_based(&self) -> bool {
        matches!(
            self,
            Value::Field { .. }
                | Value::Concept(_)
                | Value::ConceptSelected(_)
                | Value::CodeSelected(_)
        )
    }

    /// The source field a field-based value reads.
    #[must_use]
    pub fn field_id(&self) -> Option<&str> {
        match self {
            Value::Field { field_id, .. }
            | Value::Concept(field_id)
            | Value::ConceptSelected(field_id)
            | Value::CodeSelected(field_id) => Some(field_id),
            _ => None,
        }
    }

    pub fn field_id_mut(&mut self) -> Option<&mut String> {
        match self {
            Value::Field { field_id, .. }
            | Value::Concept(field_id)
            | Value::ConceptSelected(field_id)
            | Value::CodeSelected(field_id) => Some(field_id),
            _ => None,
        }
    }

    /// Parsed precision of a `VALUE(field, P)` expression. `None` when absent
    /// or not one of YEAR, MONTH, DAY.
    #[must_use]
    pub fn date_precision(&self) -> Option<DatePrecision> {
        match self {
            Value::Field {
                precision: Some(p), ..
            } => p.parse().ok(),
            _ => None,
        }
    }

    /// Name of the expression kind as it appears in rule text.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "STRING",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Decimal(_) => "DECIMAL",
            Value::CodeLiteral(_) => "CODE_LITERAL",
            Value::ConceptLiteral { .. } => "CONCEPT_LITERAL",
            Value::Reference { .. } => "REF",
            Value::Field { .. } => "VALUE",
            Value::Concept(_) => "CONCEPT",
            Value::ConceptSelected(_) => "CONCEPT_SELECTED",
            Value::CodeSelected(_) => "CODE_SELECTED",
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(v) => write!(f, "'{v}'"),
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::CodeLiteral(code) => write!(f, "CODE_LITERAL({code})"),
            Value::ConceptLiteral {
                system,
                code,
                display,
            } => {
                write!(f, "CONCEPT_LITERAL({system}|{code}")?;
                if let Some(d) = display {
                    write!(f, "|'{d}'")?;
                }
                write!(f, ")")
            }
            Value::Reference { resource_type, id } => write!(f, "REF({resource_type}<{id}>)"),
            Value::Field {
                field_id,
                precision: None,
            } => write!(f, "VALUE({field_id})"),
            Value::Field {
                field_id,
                precision: Some(p),
            } => write!(f, "VALUE({field_id}, {p})"),
            Value::Concept(id) => write!(f, "CONCEPT({id})"),
            Value::ConceptSelected(id) => write!(f, "CONCEPT_SELECTED({id})"),
            Value::CodeSelected(id) => write!(f, "CODE_SELECTED({id})"),
        }
    }
}

/// Truncation applied to date values before they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

impl FromStr for DatePrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YEAR" => Ok(DatePrecision::Year),
            "MONTH" => Ok(DatePrecision::Month),
            "DAY" => Ok(DatePrecision::Day),
            _ => Err(format!("Invalid date precision '{s}'. Valid values are YEAR, MONTH and DAY.")),
        }
    }
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePrecision::Year => write!(f, "YEAR"),
            DatePrecision::Month => write!(f, "MONTH"),
            DatePrecision::Day => write!(f, "DAY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_based_family() {
        assert!(Value::Concept("dx".into()).is_field_based());
        assert!(Value::ConceptSelected("dx".into()).is_field_based());
        assert!(Value::CodeSelected("dx".into()).is_field_based());
        assert!(Value::Field {
            field_id: "dob".into(),
            precision: None
        }
        .is_field_based());
        assert!(!Value::CodeLiteral("male".into()).is_field_based());
        assert!(!Value::Reference {
            resource_type: "Patient".into(),
            id: "p".into()
        }
        .is_field_based());
    }

    #[test]
    fn field_id_only_for_field_based() {
        assert_eq!(Value::Concept("dx_1".into()).field_id(), Some("dx_1"));
        assert_eq!(Value::from("x").field_id(), None);
    }

    #[test]
    fn precision_is_case_insensitive() {
        let v = Value::Field {
            field_id: "dob".into(),
            precision: Some("year".into()),
        };
        assert_eq!(v.date_precision(), Some(DatePrecision::Year));
        assert!("WEEK".parse::<DatePrecision>().is_err());
        assert_eq!("Month".parse::<DatePrecision>(), Ok(DatePrecision::Month));
    }

    #[test]
    fn from_primitives() {
        assert_eq!(Value::from(42_i64), Value::Integer(42));
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from("hi"), Value::String("hi".to_owned()));
    }

    #[test]
    fn display() {
        assert_eq!(Value::from("x").to_string(), "'x'");
        assert_eq!(Value::CodeLiteral("male".into()).to_string(), "CODE_LITERAL(male)");
        assert_eq!(
            Value::ConceptLiteral {
                system: "http://snomed.info/sct".into(),
                code: "1".into(),
                display: Some("One".into()),
            }
            .to_string(),
            "CONCEPT_LITERAL(http://snomed.info/sct|1|'One')"
        );
        assert_eq!(
            Value::Reference {
                resource_type: "Patient".into(),
                id: "p".into()
            }
            .to_string(),
            "REF(Patient<p>)"
        );
        assert_eq!(
            Value::Field {
                field_id: "dob".into(),
                precision: Some("YEAR".into())
            }
            .to_string(),
            "VALUE(dob, YEAR)"
        );
    }
}
