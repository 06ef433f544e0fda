use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Field, FieldError, PrimitiveKind, SchemaError, TypedValue};
use crate::row::Row;
use crate::types::{Coding, DatePrecision, Mapping, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Unknown,
    Text,
    Notes,
    Dropdown,
    Radio,
    Checkbox,
    File,
    Calc,
    Sql,
    Descriptive,
    Slider,
    YesNo,
    TrueFalse,
    CheckboxOption,
    DropdownOrRadioOption,
}

impl FieldType {
    /// Parse the `field_type` column of a REDCap data dictionary.
    #[must_use]
    pub fn from_redcap(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "text" => FieldType::Text,
            "notes" => FieldType::Notes,
            "dropdown" => FieldType::Dropdown,
            "radio" => FieldType::Radio,
            "checkbox" => FieldType::Checkbox,
            "file" => FieldType::File,
            "calc" => FieldType::Calc,
            "sql" => FieldType::Sql,
            "descriptive" => FieldType::Descriptive,
            "slider" => FieldType::Slider,
            "yesno" => FieldType::YesNo,
            "truefalse" => FieldType::TrueFalse,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Unknown => "UNKNOWN",
            FieldType::Text => "TEXT",
            FieldType::Notes => "NOTES",
            FieldType::Dropdown => "DROPDOWN",
            FieldType::Radio => "RADIO",
            FieldType::Checkbox => "CHECKBOX",
            FieldType::File => "FILE",
            FieldType::Calc => "CALC",
            FieldType::Sql => "SQL",
            FieldType::Descriptive => "DESCRIPTIVE",
            FieldType::Slider => "SLIDER",
            FieldType::YesNo => "YESNO",
            FieldType::TrueFalse => "TRUEFALSE",
            FieldType::CheckboxOption => "CHECKBOX_OPTION",
            FieldType::DropdownOrRadioOption => "DROPDOWN_OR_RADIO_OPTION",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextValidation {
    #[default]
    None,
    DateYmd,
    DateMdy,
    DateDmy,
    Time,
    DatetimeYmd,
    DatetimeMdy,
    DatetimeDmy,
    DatetimeSecondsYmd,
    DatetimeSecondsMdy,
    DatetimeSecondsDmy,
    Phone,
    Email,
    Number,
    Integer,
    Zipcode,
    FhirTerminology,
}

impl TextValidation {
    /// Parse the `text_validation_type_or_show_slider_number` column.
    #[must_use]
    pub fn from_redcap(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "date_ymd" => TextValidation::DateYmd,
            "date_mdy" => TextValidation::DateMdy,
            "date_dmy" => TextValidation::DateDmy,
            "time" => TextValidation::Time,
            "datetime_ymd" => TextValidation::DatetimeYmd,
            "datetime_mdy" => TextValidation::DatetimeMdy,
            "datetime_dmy" => TextValidation::DatetimeDmy,
            "datetime_seconds_ymd" => TextValidation::DatetimeSecondsYmd,
            "datetime_seconds_mdy" => TextValidation::DatetimeSecondsMdy,
            "datetime_seconds_dmy" => TextValidation::DatetimeSecondsDmy,
            "phone" => TextValidation::Phone,
            "email" => TextValidation::Email,
            "number" => TextValidation::Number,
            "integer" => TextValidation::Integer,
            "zipcode" => TextValidation::Zipcode,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TextValidation::None => "NONE",
            TextValidation::DateYmd => "DATE_YMD",
            TextValidation::DateMdy => "DATE_MDY",
            TextValidation::DateDmy => "DATE_DMY",
            TextValidation::Time => "TIME",
            TextValidation::DatetimeYmd => "DATETIME_YMD",
            TextValidation::DatetimeMdy => "DATETIME_MDY",
            TextValidation::DatetimeDmy => "DATETIME_DMY",
            TextValidation::DatetimeSecondsYmd => "DATETIME_SECONDS_YMD",
            TextValidation::DatetimeSecondsMdy => "DATETIME_SECONDS_MDY",
            TextValidation::DatetimeSecondsDmy => "DATETIME_SECONDS_DMY",
            TextValidation::Phone => "PHONE",
            TextValidation::Email => "EMAIL",
            TextValidation::Number => "NUMBER",
            TextValidation::Integer => "INTEGER",
            TextValidation::Zipcode => "ZIPCODE",
            TextValidation::FhirTerminology => "FHIR_TERMINOLOGY",
        }
    }
}

// REDCap exports dates as YMD regardless of the entry format.
const DATE: &str = "%Y-%m-%d";
const DATETIME: &str = "%Y-%m-%d %H:%M";
const DATETIME_SECONDS: &str = "%Y-%m-%d %H:%M:%S";

/// A field of a REDCap data dictionary.
#[derive(Debug, Clone)]
pub struct RedcapField {
    field_id: String,
    label: String,
    field_type: FieldType,
    validation: TextValidation,
    options: Vec<Arc<RedcapField>>,
}

impl RedcapField {
    #[must_use]
    pub fn new(field_id: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            field_id: field_id.to_owned(),
            label: label.to_owned(),
            field_type,
            validation: TextValidation::None,
            options: Vec::new(),
        }
    }

    /// A `TEXT` field with a validation.
    #[must_use]
    pub fn text(field_id: &str, label: &str, validation: TextValidation) -> Self {
        Self {
            validation,
            ..Self::new(field_id, label, FieldType::Text)
        }
    }

    /// Add an option, addressable as `fieldId___code`.
    #[must_use]
    pub fn with_option(mut self, code: &str, label: &str) -> Self {
        let option_type = if self.field_type == FieldType::Checkbox {
            FieldType::CheckboxOption
        } else {
            FieldType::DropdownOrRadioOption
        };
        let id = format!("{}___{}", self.field_id, code);
        self.options
            .push(Arc::new(RedcapField::new(&id, label, option_type)));
        self
    }

    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    #[must_use]
    pub fn validation(&self) -> TextValidation {
        self.validation
    }

    fn raw<'r>(&self, row: &'r Row) -> Result<&'r str, FieldError> {
        row.get(&self.field_id)
            .ok_or_else(|| FieldError::Missing(self.field_id.clone()))
    }
}

impl Field for RedcapField {
    fn field_id(&self) -> &str {
        &self.field_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn type_name(&self) -> String {
        if self.field_type == FieldType::Text {
            format!("REDCap ({}, {})", self.field_type, self.validation.as_str())
        } else {
            format!("REDCap ({})", self.field_type)
        }
    }

    fn is_compatible_with(&self, value: &Value, issues: &mut Vec<String>) -> bool {
        let ft = self.field_type;
        let mut compatible = true;
        match value {
            Value::Concept(_) => {
                if !matches!(
                    ft,
                    FieldType::Text
                        | FieldType::YesNo
                        | FieldType::Dropdown
                        | FieldType::Radio
                        | FieldType::DropdownOrRadioOption
                        | FieldType::Checkbox
                        | FieldType::CheckboxOption
                        | FieldType::TrueFalse
                ) {
                    issues.push(format!(
                        "The expression CONCEPT can only be used on fields of type TEXT, YESNO, DROPDOWN, \
                         RADIO, DROPDOWN_OR_RADIO_OPTION, CHECKBOX, CHECKBOX_OPTION or TRUEFALSE but field {} \
                         is of type {ft}",
                        self.field_id
                    ));
                    compatible = false;
                }
                if ft == FieldType::Text && self.validation != TextValidation::FhirTerminology {
                    issues.push(format!(
                        "The field {} is a text field but it is not validated using a FHIR terminology \
                         server. CONCEPT expressions used on fields of type TEXT require that the fields \
                         are validated using a FHIR terminology server.",
                        self.field_id
                    ));
                    compatible = false;
                }
            }
            Value::ConceptSelected(_) | Value::CodeSelected(_)
                if !matches!(ft, FieldType::Dropdown | FieldType::Radio) =>
            {
                issues.push(format!(
                    "The expression {} can only be used on fields of type DROPDOWN and RADIO but field {} \
                     is of type {ft}",
                    value.kind_name(),
                    self.field_id
                ));
                compatible = false;
            }
            _ => {}
        }
        compatible
    }

    fn needs_mapping(&self, value: &Value) -> bool {
        match value {
            Value::ConceptSelected(_) | Value::CodeSelected(_) => true,
            Value::Concept(_) => {
                !(self.field_type == FieldType::Text
                    && self.validation == TextValidation::FhirTerminology)
            }
            _ => false,
        }
    }

    fn find_selected_mapping<'m>(
        &self,
        mappings: &'m IndexMap<String, Mapping>,
        row: &Row,
    ) -> Option<&'m Mapping> {
        match self.field_type {
            FieldType::Radio | FieldType::Dropdown => {
                let selected = row.non_empty(&self.field_id)?;
                mappings.get(&format!("{}___{}", self.field_id, selected))
            }
            FieldType::CheckboxOption => match row.get(&self.field_id) {
                Some("1") => mappings.get(&self.field_id),
                _ => None,
            },
            _ => None,
        }
    }

    fn coding(&self, row: &Row) -> Option<Coding> {
        if self.validation != TextValidation::FhirTerminology {
            return None;
        }
        let raw = row.non_empty(&self.field_id)?;
        let parts: Vec<&str> = raw.split('|').collect();
        match parts.as_slice() {
            [code, display, system] => {
                Some(Coding::new(system.trim(), code.trim()).with_display(display.trim()))
            }
            _ => Some(Coding::unknown()),
        }
    }

    fn value(
        &self,
        row: &Row,
        kind: PrimitiveKind,
        precision: Option<DatePrecision>,
    ) -> Result<TypedValue, FieldError> {
        let raw = self.raw(row)?;
        match self.field_type {
            FieldType::Text => match self.validation {
                TextValidation::DatetimeYmd
                | TextValidation::DatetimeMdy
                | TextValidation::DatetimeDmy => date(raw, DATETIME, true, kind, precision),
                TextValidation::DatetimeSecondsYmd
                | TextValidation::DatetimeSecondsMdy
                | TextValidation::DatetimeSecondsDmy => {
                    date(raw, DATETIME_SECONDS, true, kind, precision)
                }
                TextValidation::DateYmd | TextValidation::DateMdy | TextValidation::DateDmy => {
                    date(raw, DATE, false, kind, precision)
                }
                TextValidation::Integer => integer(raw, kind, precision),
                TextValidation::Number => decimal(raw, kind),
                TextValidation::Time => Ok(TypedValue::Time(format!("{raw}:00"))),
                TextValidation::None => string(raw, kind, "TEXT"),
                TextValidation::Email => string(raw, kind, "EMAIL"),
                TextValidation::Phone => string(raw, kind, "PHONE"),
                TextValidation::Zipcode => string(raw, kind, "ZIPCODE"),
                TextValidation::FhirTerminology => Err(FieldError::UnsupportedFieldType {
                    field_type: "TEXT (FHIR_TERMINOLOGY)".to_owned(),
                    field_id: self.field_id.clone(),
                }),
            },
            FieldType::Calc => decimal(raw, kind),
            FieldType::Notes => string(raw, kind, "NOTES"),
            other => Err(FieldError::UnsupportedFieldType {
                field_type: other.to_string(),
                field_id: self.field_id.clone(),
            }),
        }
    }

    fn options(&self) -> Vec<Arc<dyn Field>> {
        self.options
            .iter()
            .map(|o| Arc::clone(o) as Arc<dyn Field>)
            .collect()
    }

    fn natural_kind(&self) -> PrimitiveKind {
        match (self.field_type, self.validation) {
            (FieldType::Text, TextValidation::DateYmd | TextValidation::DateMdy | TextValidation::DateDmy) => {
                PrimitiveKind::Date
            }
            (
                FieldType::Text,
                TextValidation::DatetimeYmd
                | TextValidation::DatetimeMdy
                | TextValidation::DatetimeDmy
                | TextValidation::DatetimeSecondsYmd
                | TextValidation::DatetimeSecondsMdy
                | TextValidation::DatetimeSecondsDmy,
            ) => PrimitiveKind::DateTime,
            (FieldType::Text, TextValidation::Time) => PrimitiveKind::Time,
            (FieldType::Text, TextValidation::Integer) => PrimitiveKind::Integer,
            (FieldType::Text, TextValidation::Number) | (FieldType::Calc, _) => PrimitiveKind::Decimal,
            _ => PrimitiveKind::String,
        }
    }

    fn is_multi_select(&self) -> bool {
        self.field_type == FieldType::Checkbox
    }
}

/// Finite decimals only. `NaN` and `inf` parse as `f64` but have no JSON form.
fn parse_decimal(raw: &str) -> Result<f64, FieldError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .ok_or_else(|| parse_error("decimal", raw))
}

fn parse_error(kind: &'static str, raw: &str) -> FieldError {
    FieldError::Parse {
        kind,
        value: raw.to_owned(),
    }
}

fn truncate(dt: NaiveDateTime, precision: DatePrecision) -> Option<NaiveDateTime> {
    let d = dt.date();
    let date = match precision {
        DatePrecision::Year => NaiveDate::from_ymd_opt(d.year(), 1, 1)?,
        DatePrecision::Month => NaiveDate::from_ymd_opt(d.year(), d.month(), 1)?,
        DatePrecision::Day => d,
    };
    Some(date.and_time(NaiveTime::MIN))
}

fn date(
    raw: &str,
    format: &str,
    has_time: bool,
    kind: PrimitiveKind,
    precision: Option<DatePrecision>,
) -> Result<TypedValue, FieldError> {
    let raw = raw.trim();
    let parsed = if has_time {
        NaiveDateTime::parse_from_str(raw, format)
    } else {
        NaiveDate::parse_from_str(raw, format).map(|d| d.and_time(NaiveTime::MIN))
    }
    .map_err(|_| parse_error("date", raw))?;
    let dt = match precision {
        Some(p) => truncate(parsed, p).ok_or_else(|| parse_error("date", raw))?,
        None => parsed,
    };
    let date_only = !has_time || precision.is_some();
    match kind {
        PrimitiveKind::Instant => Ok(TypedValue::Instant(
            dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        )),
        PrimitiveKind::DateTime if date_only => {
            Ok(TypedValue::DateTime(dt.format("%Y-%m-%d").to_string()))
        }
        PrimitiveKind::DateTime => Ok(TypedValue::DateTime(
            dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        )),
        PrimitiveKind::Date => Ok(TypedValue::Date(dt.format("%Y-%m-%d").to_string())),
        other => Err(FieldError::Unsupported {
            source_kind: "DATE TIME".to_owned(),
            target: other,
            supported: "Instant, DateTime and Date are supported",
        }),
    }
}

fn string(raw: &str, kind: PrimitiveKind, source_kind: &str) -> Result<TypedValue, FieldError> {
    match kind {
        PrimitiveKind::String => Ok(TypedValue::String(raw.to_owned())),
        other => Err(FieldError::Unsupported {
            source_kind: source_kind.to_owned(),
            target: other,
            supported: "String is supported",
        }),
    }
}

fn decimal(raw: &str, kind: PrimitiveKind) -> Result<TypedValue, FieldError> {
    match kind {
        PrimitiveKind::Decimal => parse_decimal(raw).map(TypedValue::Decimal),
        PrimitiveKind::String => Ok(TypedValue::String(raw.to_owned())),
        other => Err(FieldError::Unsupported {
            source_kind: "NUMBER".to_owned(),
            target: other,
            supported: "Decimal and String are supported",
        }),
    }
}

fn integer(
    raw: &str,
    kind: PrimitiveKind,
    precision: Option<DatePrecision>,
) -> Result<TypedValue, FieldError> {
    match kind {
        PrimitiveKind::Integer => raw
            .trim()
            .parse()
            .map(TypedValue::Integer)
            .map_err(|_| parse_error("integer", raw)),
        PrimitiveKind::String => Ok(TypedValue::String(raw.to_owned())),
        PrimitiveKind::Decimal => parse_decimal(raw).map(TypedValue::Decimal),
        PrimitiveKind::Date if precision == Some(DatePrecision::Year) => {
            let year: i32 = raw.trim().parse().map_err(|_| parse_error("year", raw))?;
            let d = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| parse_error("year", raw))?;
            Ok(TypedValue::Date(d.format("%Y-%m-%d").to_string()))
        }
        other => Err(FieldError::Unsupported {
            source_kind: "INTEGER".to_owned(),
            target: other,
            supported: "Integer, Decimal and String are supported",
        }),
    }
}

#[derive(Debug, Deserialize)]
struct DictionaryEntry {
    field_name: Option<String>,
    #[serde(default)]
    field_label: String,
    #[serde(default)]
    field_type: String,
    #[serde(default)]
    text_validation_type_or_show_slider_number: String,
    #[serde(default)]
    select_choices_or_calculations: String,
}

/// Build fields from a REDCap data dictionary export.
pub(super) fn import_json(json: &str) -> Result<Vec<RedcapField>, SchemaError> {
    let entries: Vec<DictionaryEntry> = serde_json::from_str(json)?;
    if entries.is_empty() {
        return Err(SchemaError::Empty);
    }

    let mut fields = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let field_id = entry.field_name.ok_or(SchemaError::MissingKey {
            index,
            key: "field_name",
        })?;
        let label = entry.field_label.as_str();
        let validation = entry.text_validation_type_or_show_slider_number.trim();
        let choices = entry.select_choices_or_calculations.trim();

        let mut field = if !validation.is_empty() && entry.field_type != "slider" {
            let v = TextValidation::from_redcap(validation).unwrap_or_else(|| {
                tracing::warn!(field = %field_id, validation, "unknown text validation type");
                TextValidation::None
            });
            RedcapField::text(&field_id, label, v)
        } else if choices.starts_with("FHIR:") {
            RedcapField::text(&field_id, label, TextValidation::FhirTerminology)
        } else {
            let ft = FieldType::from_redcap(&entry.field_type).unwrap_or_else(|| {
                tracing::warn!(field = %field_id, field_type = %entry.field_type, "unknown field type");
                FieldType::Unknown
            });
            RedcapField::new(&field_id, label, ft)
        };

        if matches!(
            field.field_type,
            FieldType::Checkbox | FieldType::Radio | FieldType::Dropdown
        ) {
            for part in choices.split('|').map(str::trim).filter(|p| !p.is_empty()) {
                match part.split_once(',') {
                    Some((code, option_label)) => {
                        field = field.with_option(code.trim(), option_label.trim());
                    }
                    None => tracing::warn!(
                        field = %field_id,
                        choice = part,
                        "invalid select choice, ignoring"
                    ),
                }
            }
        }
        fields.push(field);
    }
    tracing::debug!(fields = fields.len(), "imported REDCap data dictionary");
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, v: &str) -> Row {
        Row::new().set(id, v)
    }

    #[test]
    fn concept_on_plain_text_is_incompatible() {
        let f = RedcapField::text("notes", "Notes", TextValidation::None);
        let mut issues = Vec::new();
        assert!(!f.is_compatible_with(&Value::Concept("notes".into()), &mut issues));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("not validated using a FHIR terminology server"));
    }

    #[test]
    fn concept_on_calc_lists_allowed_types() {
        let f = RedcapField::new("bmi", "BMI", FieldType::Calc);
        let mut issues = Vec::new();
        assert!(!f.is_compatible_with(&Value::Concept("bmi".into()), &mut issues));
        assert!(issues[0].starts_with("The expression CONCEPT can only be used"));
        assert!(issues[0].ends_with("is of type CALC"));
    }

    #[test]
    fn selected_only_on_radio_or_dropdown() {
        let radio = RedcapField::new("sex", "Sex", FieldType::Radio);
        let check = RedcapField::new("sym", "Symptoms", FieldType::Checkbox);
        let mut issues = Vec::new();
        assert!(radio.is_compatible_with(&Value::CodeSelected("sex".into()), &mut issues));
        assert!(!check.is_compatible_with(&Value::ConceptSelected("sym".into()), &mut issues));
        assert_eq!(
            issues,
            vec!["The expression CONCEPT_SELECTED can only be used on fields of type DROPDOWN and RADIO but field sym is of type CHECKBOX".to_owned()]
        );
    }

    #[test]
    fn mapping_requirements() {
        let fhir = RedcapField::text("dx", "Diagnosis", TextValidation::FhirTerminology);
        let radio = RedcapField::new("sex", "Sex", FieldType::Radio);
        assert!(!fhir.needs_mapping(&Value::Concept("dx".into())));
        assert!(radio.needs_mapping(&Value::Concept("sex".into())));
        assert!(radio.needs_mapping(&Value::CodeSelected("sex".into())));
        assert!(!radio.needs_mapping(&Value::Field {
            field_id: "sex".into(),
            precision: None
        }));
    }

    #[test]
    fn selected_mapping_uses_row_value() {
        let radio = RedcapField::new("sex", "Sex", FieldType::Radio);
        let mut mappings = IndexMap::new();
        mappings.insert(
            "sex___2".to_owned(),
            Mapping {
                field_id: "sex___2".into(),
                label: None,
                target: Coding::new("http://snomed.info/sct", "248152002"),
                span: Default::default(),
            },
        );
        let m = radio.find_selected_mapping(&mappings, &row("sex", "2")).unwrap();
        assert_eq!(m.target.code, "248152002");
        assert!(radio.find_selected_mapping(&mappings, &row("sex", "1")).is_none());
    }

    #[test]
    fn coding_from_terminology_value() {
        let f = RedcapField::text("dx", "Diagnosis", TextValidation::FhirTerminology);
        let c = f
            .coding(&row("dx", "38341003 | Hypertension | http://snomed.info/sct"))
            .unwrap();
        assert_eq!(c.system, "http://snomed.info/sct");
        assert_eq!(c.code, "38341003");
        assert_eq!(c.display.as_deref(), Some("Hypertension"));
        assert_eq!(f.coding(&row("dx", "garbage")), Some(Coding::unknown()));
        assert_eq!(f.coding(&Row::new()), None);
    }

    #[test]
    fn date_values_and_precision() {
        let f = RedcapField::text("dob", "DOB", TextValidation::DateYmd);
        let r = row("dob", "1990-04-12");
        assert_eq!(
            f.value(&r, PrimitiveKind::Date, None),
            Ok(TypedValue::Date("1990-04-12".into()))
        );
        assert_eq!(
            f.value(&r, PrimitiveKind::Date, Some(DatePrecision::Year)),
            Ok(TypedValue::Date("1990-01-01".into()))
        );
        assert_eq!(
            f.value(&r, PrimitiveKind::Date, Some(DatePrecision::Month)),
            Ok(TypedValue::Date("1990-04-01".into()))
        );
        assert!(matches!(
            f.value(&r, PrimitiveKind::Integer, None),
            Err(FieldError::Unsupported { .. })
        ));
    }

    #[test]
    fn datetime_values() {
        let f = RedcapField::text("adm", "Admitted", TextValidation::DatetimeYmd);
        let r = row("adm", "2020-02-03 10:30");
        assert_eq!(
            f.value(&r, PrimitiveKind::DateTime, None),
            Ok(TypedValue::DateTime("2020-02-03T10:30:00".into()))
        );
        assert_eq!(
            f.value(&r, PrimitiveKind::DateTime, Some(DatePrecision::Day)),
            Ok(TypedValue::DateTime("2020-02-03".into()))
        );
        assert_eq!(
            f.value(&r, PrimitiveKind::Instant, None),
            Ok(TypedValue::Instant("2020-02-03T10:30:00Z".into()))
        );
        assert!(matches!(
            f.value(&row("adm", "yesterday"), PrimitiveKind::DateTime, None),
            Err(FieldError::Parse { .. })
        ));
    }

    #[test]
    fn integer_targets() {
        let f = RedcapField::text("age", "Age", TextValidation::Integer);
        let r = row("age", "42");
        assert_eq!(f.value(&r, PrimitiveKind::Integer, None), Ok(TypedValue::Integer(42)));
        assert_eq!(f.value(&r, PrimitiveKind::String, None), Ok(TypedValue::String("42".into())));
        assert_eq!(f.value(&r, PrimitiveKind::Decimal, None), Ok(TypedValue::Decimal(42.0)));
        let y = row("age", "1990");
        assert_eq!(
            f.value(&y, PrimitiveKind::Date, Some(DatePrecision::Year)),
            Ok(TypedValue::Date("1990-01-01".into()))
        );
        let err = f.value(&r, PrimitiveKind::Boolean, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Tried to assign REDCap INTEGER field to FHIR type boolean. Only Integer, Decimal and String are supported."
        );
    }

    #[test]
    fn non_finite_numbers_are_parse_errors() {
        let f = RedcapField::text("w", "Weight", TextValidation::Number);
        for raw in ["NaN", "inf", "-infinity", "1e999"] {
            assert_eq!(
                f.value(&row("w", raw), PrimitiveKind::Decimal, None),
                Err(FieldError::Parse {
                    kind: "decimal",
                    value: raw.into()
                }),
                "{raw}"
            );
        }
        assert_eq!(
            f.value(&row("w", " -0.25 "), PrimitiveKind::Decimal, None),
            Ok(TypedValue::Decimal(-0.25))
        );
        assert_eq!(
            f.value(&row("w", "NaN"), PrimitiveKind::String, None),
            Ok(TypedValue::String("NaN".into()))
        );

        let i = RedcapField::text("age", "Age", TextValidation::Integer);
        assert!(matches!(
            i.value(&row("age", "inf"), PrimitiveKind::Decimal, None),
            Err(FieldError::Parse { kind: "decimal", .. })
        ));
        assert!(matches!(
            i.value(&row("age", "99999999999999999999"), PrimitiveKind::Integer, None),
            Err(FieldError::Parse { kind: "integer", .. })
        ));
    }

    #[test]
    fn text_family_is_string_only() {
        let f = RedcapField::text("mail", "Email", TextValidation::Email);
        assert_eq!(
            f.value(&row("mail", "a@b.c"), PrimitiveKind::String, None),
            Ok(TypedValue::String("a@b.c".into()))
        );
        let err = f.value(&row("mail", "a@b.c"), PrimitiveKind::Integer, None).unwrap_err();
        assert!(err.to_string().contains("REDCap EMAIL field"));
    }

    #[test]
    fn time_appends_seconds() {
        let f = RedcapField::text("t", "Time", TextValidation::Time);
        assert_eq!(
            f.value(&row("t", "08:15"), PrimitiveKind::Time, None),
            Ok(TypedValue::Time("08:15:00".into()))
        );
    }

    #[test]
    fn choice_fields_not_supported_in_value() {
        let f = RedcapField::new("sex", "Sex", FieldType::Radio);
        let err = f.value(&row("sex", "1"), PrimitiveKind::String, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "REDCap field type RADIO is not supported in a VALUE expression (field: sex)"
        );
    }

    #[test]
    fn import_dictionary() {
        let json = r#"[
            {"field_name": "record_id", "field_label": "Record ID", "field_type": "text",
             "text_validation_type_or_show_slider_number": "", "select_choices_or_calculations": ""},
            {"field_name": "dob", "field_label": "Date of birth", "field_type": "text",
             "text_validation_type_or_show_slider_number": "date_dmy", "select_choices_or_calculations": ""},
            {"field_name": "sex", "field_label": "Sex", "field_type": "radio",
             "text_validation_type_or_show_slider_number": "", "select_choices_or_calculations": "1, Male | 2, Female"},
            {"field_name": "sym", "field_label": "Symptoms", "field_type": "checkbox",
             "text_validation_type_or_show_slider_number": "", "select_choices_or_calculations": "1, Fever | 2, Cough"},
            {"field_name": "dx", "field_label": "Diagnosis", "field_type": "text",
             "text_validation_type_or_show_slider_number": "", "select_choices_or_calculations": "FHIR:http://snomed.info/sct"},
            {"field_name": "weird", "field_label": "Weird", "field_type": "matrix",
             "text_validation_type_or_show_slider_number": "", "select_choices_or_calculations": ""}
        ]"#;
        let fields = import_json(json).unwrap();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[1].validation(), TextValidation::DateDmy);
        assert_eq!(fields[2].options.len(), 2);
        assert_eq!(fields[2].options[1].field_id(), "sex___2");
        assert_eq!(fields[2].options[1].field_type(), FieldType::DropdownOrRadioOption);
        assert_eq!(fields[3].options[0].field_type(), FieldType::CheckboxOption);
        assert_eq!(fields[4].validation(), TextValidation::FhirTerminology);
        assert_eq!(fields[5].field_type(), FieldType::Unknown);
    }

    #[test]
    fn import_rejects_empty_and_malformed() {
        assert!(matches!(import_json("[]"), Err(SchemaError::Empty)));
        assert!(matches!(import_json("{"), Err(SchemaError::Json(_))));
        assert!(matches!(
            import_json(r#"[{"field_label": "x"}]"#),
            Err(SchemaError::MissingKey { index: 0, .. })
        ));
    }
}
