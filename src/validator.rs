//! Attribute path validation against the target data model.
//!
//! The compiler asks a [`PathValidator`] whether resource types and attribute
//! paths exist and looks up their cardinality and type. Implementations may be
//! backed by a remote service, so every call can fail with
//! [`ValidatorError`]; the compiler reports that as a warning and carries on.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("path validator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid path definitions: {0}")]
    Definitions(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Cardinality and type of one element path, e.g. `Patient.identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub path: String,
    pub min: u32,
    /// `"*"` or a number.
    pub max: String,
    #[serde(rename = "type", default)]
    pub fhir_type: Option<String>,
    #[serde(default)]
    pub target_profiles: Vec<String>,
    /// Canonical url when the path is a profiled extension.
    #[serde(default)]
    pub extension_url: Option<String>,
}

impl PathInfo {
    #[must_use]
    pub fn new(path: &str, min: u32, max: &str, fhir_type: &str) -> Self {
        Self {
            path: path.to_owned(),
            min,
            max: max.to_owned(),
            fhir_type: Some(fhir_type.to_owned()),
            target_profiles: Vec::new(),
            extension_url: None,
        }
    }

    #[must_use]
    pub fn with_target_profiles(mut self, profiles: &[&str]) -> Self {
        self.target_profiles = profiles.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_extension_url(mut self, url: &str) -> Self {
        self.extension_url = Some(url.to_owned());
        self
    }

    /// Numeric maximum. `None` for `*`.
    #[must_use]
    pub fn max_cardinality(&self) -> Option<usize> {
        self.max.parse().ok()
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.max == "*" || self.max_cardinality().is_some_and(|m| m > 1)
    }

    #[must_use]
    pub fn is_prohibited(&self) -> bool {
        self.max_cardinality() == Some(0)
    }
}

pub trait PathValidator: Send + Sync {
    /// Whether `resource_type` names a resource of the target model.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] when the validator cannot answer.
    fn validate_resource(&self, resource_type: &str) -> Result<bool, ValidatorError> {
        self.validate_path(resource_type)
    }

    /// Whether `path` (dotted, no indices) is a valid element path.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] when the validator cannot answer.
    fn validate_path(&self, path: &str) -> Result<bool, ValidatorError>;

    /// Cardinality and type of `path`. `Ok(None)` for unknown paths.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] when the validator cannot answer.
    fn lookup(&self, path: &str) -> Result<Option<PathInfo>, ValidatorError>;
}

/// An in-memory validator built from a fixed set of path definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticPathValidator {
    resources: HashSet<String>,
    paths: HashMap<String, PathInfo>,
}

impl StaticPathValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn resource(mut self, resource_type: &str) -> Self {
        self.resources.insert(resource_type.to_owned());
        self
    }

    /// Register a path. Its resource type (the first segment) is registered too.
    #[must_use]
    pub fn path(mut self, info: PathInfo) -> Self {
        if let Some(root) = info.path.split('.').next() {
            self.resources.insert(root.to_owned());
        }
        self.paths.insert(info.path.clone(), info);
        self
    }

    /// Load definitions from a JSON array of [`PathInfo`] objects.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::Definitions`] when the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ValidatorError> {
        let infos: Vec<PathInfo> = serde_json::from_str(json)?;
        Ok(infos.into_iter().fold(Self::new(), Self::path))
    }

    /// # Errors
    ///
    /// Returns [`ValidatorError`] when the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidatorError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl PathValidator for StaticPathValidator {
    fn validate_resource(&self, resource_type: &str) -> Result<bool, ValidatorError> {
        Ok(self.resources.contains(resource_type))
    }

    fn validate_path(&self, path: &str) -> Result<bool, ValidatorError> {
        Ok(self.paths.contains_key(path))
    }

    fn lookup(&self, path: &str) -> Result<Option<PathInfo>, ValidatorError> {
        Ok(self.paths.get(path).cloned())
    }
}

/// Split a dotted path at each `extension` segment into independently
/// validated segments.
///
/// `Patient.extension.valueCode` becomes `["Patient.extension",
/// "Extension.valueCode"]`.
#[must_use]
pub fn split_extension(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').collect();
    let split_at = segments
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, s)| **s == "extension" || **s == "modifierExtension")
        .map(|(i, _)| i);
    match split_at {
        Some(i) if i + 1 < segments.len() => {
            let mut out = vec![segments[..=i].join(".")];
            let rest = format!("Extension.{}", segments[i + 1..].join("."));
            out.extend(split_extension(&rest));
            out
        }
        _ => vec![path.to_owned()],
    }
}
