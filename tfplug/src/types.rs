//! Core type system for tfplug
//!
//! This module provides the value types shared by providers and the
//! acceptance harness: [`Dynamic`] values, [`DynamicValue`] with path based
//! accessors, [`AttributePath`] and [`Diagnostic`].

use crate::error::{Result, TfplugError};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Dynamic represents Terraform values that can be of any type
/// Objects and maps are both represented as `Map`; keys are kept sorted so
/// that rendering and flattening are deterministic
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    Null,
    Bool(bool),
    /// All numbers are f64 to match Terraform
    Number(f64),
    String(String),
    List(Vec<Dynamic>),
    Map(BTreeMap<String, Dynamic>),
    /// Value not yet known (during planning)
    Unknown,
}

impl Dynamic {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Dynamic::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Dynamic::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::Null)
    }

    /// True when neither this value nor anything nested in it is unknown
    pub fn is_fully_known(&self) -> bool {
        match self {
            Dynamic::Unknown => false,
            Dynamic::List(items) => items.iter().all(Dynamic::is_fully_known),
            Dynamic::Map(entries) => entries.values().all(Dynamic::is_fully_known),
            _ => true,
        }
    }

    /// Same value with every unknown leaf replaced by null
    pub fn unknowns_to_null(self) -> Dynamic {
        match self {
            Dynamic::Unknown => Dynamic::Null,
            Dynamic::List(items) => {
                Dynamic::List(items.into_iter().map(Dynamic::unknowns_to_null).collect())
            }
            Dynamic::Map(entries) => Dynamic::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.unknowns_to_null()))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Dynamic::Null => "null",
            Dynamic::Bool(_) => "bool",
            Dynamic::Number(_) => "number",
            Dynamic::String(_) => "string",
            Dynamic::List(_) => "list",
            Dynamic::Map(_) => "map",
            Dynamic::Unknown => "unknown",
        }
    }
}

impl From<&str> for Dynamic {
    fn from(value: &str) -> Self {
        Dynamic::String(value.to_string())
    }
}

impl From<String> for Dynamic {
    fn from(value: String) -> Self {
        Dynamic::String(value)
    }
}

impl From<bool> for Dynamic {
    fn from(value: bool) -> Self {
        Dynamic::Bool(value)
    }
}

impl From<f64> for Dynamic {
    fn from(value: f64) -> Self {
        Dynamic::Number(value)
    }
}

impl From<i64> for Dynamic {
    fn from(value: i64) -> Self {
        Dynamic::Number(value as f64)
    }
}

impl From<u32> for Dynamic {
    fn from(value: u32) -> Self {
        Dynamic::Number(f64::from(value))
    }
}

impl Serialize for Dynamic {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Dynamic::Null => serializer.serialize_unit(),
            Dynamic::Bool(b) => serializer.serialize_bool(*b),
            Dynamic::Number(n) => serializer.serialize_f64(*n),
            Dynamic::String(s) => serializer.serialize_str(s),
            Dynamic::List(l) => l.serialize(serializer),
            Dynamic::Map(m) => m.serialize(serializer),
            Dynamic::Unknown => serializer.serialize_str("(known after apply)"),
        }
    }
}

/// Format a number the way Terraform's flatmap does: whole numbers have no fraction
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// DynamicValue wraps Dynamic and provides typed, path based access
/// This is what gets passed between the harness and the provider
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicValue {
    pub value: Dynamic,
}

impl DynamicValue {
    pub fn new(value: Dynamic) -> Self {
        Self { value }
    }

    pub fn null() -> Self {
        Self {
            value: Dynamic::Null,
        }
    }

    /// An empty object, the usual starting point for building state
    pub fn object() -> Self {
        Self {
            value: Dynamic::Map(BTreeMap::new()),
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn encode_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.value)?)
    }

    /// Type-safe accessors - ALWAYS use these instead of pattern matching
    pub fn get(&self, path: &AttributePath) -> Result<&Dynamic> {
        self.navigate_path(path)
    }

    pub fn get_string(&self, path: &AttributePath) -> Result<String> {
        let value = self.navigate_path(path)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("string", value))
    }

    pub fn get_number(&self, path: &AttributePath) -> Result<f64> {
        let value = self.navigate_path(path)?;
        value.as_number().ok_or_else(|| mismatch("number", value))
    }

    pub fn get_bool(&self, path: &AttributePath) -> Result<bool> {
        let value = self.navigate_path(path)?;
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }

    pub fn get_list(&self, path: &AttributePath) -> Result<Vec<Dynamic>> {
        match self.navigate_path(path)? {
            Dynamic::List(l) => Ok(l.clone()),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn get_map(&self, path: &AttributePath) -> Result<BTreeMap<String, Dynamic>> {
        match self.navigate_path(path)? {
            Dynamic::Map(m) => Ok(m.clone()),
            other => Err(mismatch("map", other)),
        }
    }

    /// Optional string: absent and null both read as `None`
    pub fn get_optional_string(&self, path: &AttributePath) -> Result<Option<String>> {
        match self.navigate_path(path) {
            Ok(Dynamic::Null) | Err(TfplugError::AttributeNotFound(_)) => Ok(None),
            Ok(Dynamic::String(s)) => Ok(Some(s.clone())),
            Ok(other) => Err(mismatch("string", other)),
            Err(e) => Err(e),
        }
    }

    /// Optional map of strings, as used for `tags`
    pub fn get_string_map(&self, path: &AttributePath) -> Result<BTreeMap<String, String>> {
        match self.navigate_path(path) {
            Ok(Dynamic::Null) | Err(TfplugError::AttributeNotFound(_)) => Ok(BTreeMap::new()),
            Ok(Dynamic::Map(m)) => m
                .iter()
                .map(|(k, v)| match v {
                    Dynamic::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(mismatch("string", other)),
                })
                .collect(),
            Ok(other) => Err(mismatch("map", other)),
            Err(e) => Err(e),
        }
    }

    pub fn set_string(&mut self, path: &AttributePath, value: impl Into<String>) -> Result<()> {
        self.set_value(path, Dynamic::String(value.into()))
    }

    pub fn set_number(&mut self, path: &AttributePath, value: f64) -> Result<()> {
        self.set_value(path, Dynamic::Number(value))
    }

    pub fn set_bool(&mut self, path: &AttributePath, value: bool) -> Result<()> {
        self.set_value(path, Dynamic::Bool(value))
    }

    pub fn set_list(&mut self, path: &AttributePath, value: Vec<Dynamic>) -> Result<()> {
        self.set_value(path, Dynamic::List(value))
    }

    pub fn set_map(&mut self, path: &AttributePath, value: BTreeMap<String, Dynamic>) -> Result<()> {
        self.set_value(path, Dynamic::Map(value))
    }

    pub fn set_string_map(
        &mut self,
        path: &AttributePath,
        value: &BTreeMap<String, String>,
    ) -> Result<()> {
        let map = value
            .iter()
            .map(|(k, v)| (k.clone(), Dynamic::String(v.clone())))
            .collect();
        self.set_value(path, Dynamic::Map(map))
    }

    /// Set a string when present, null otherwise
    pub fn set_optional_string(&mut self, path: &AttributePath, value: Option<&str>) -> Result<()> {
        match value {
            Some(s) => self.set_string(path, s),
            None => self.set_value(path, Dynamic::Null),
        }
    }

    pub fn set_value(&mut self, path: &AttributePath, new_value: Dynamic) -> Result<()> {
        let Some((last, parents)) = path.steps.split_last() else {
            self.value = new_value;
            return Ok(());
        };

        if !matches!(self.value, Dynamic::Map(_)) {
            self.value = Dynamic::Map(BTreeMap::new());
        }

        let mut current = &mut self.value;
        for (idx, step) in parents.iter().enumerate() {
            let next_is_index = matches!(path.steps.get(idx + 1), Some(AttributePathStep::ElementKeyInt(_)));
            current = match (current, step) {
                (
                    Dynamic::Map(m),
                    AttributePathStep::AttributeName(name) | AttributePathStep::ElementKeyString(name),
                ) => m.entry(name.clone()).or_insert_with(|| {
                    if next_is_index {
                        Dynamic::List(Vec::new())
                    } else {
                        Dynamic::Map(BTreeMap::new())
                    }
                }),
                (Dynamic::List(l), AttributePathStep::ElementKeyInt(idx)) => {
                    let len = l.len();
                    usize::try_from(*idx)
                        .ok()
                        .and_then(|i| l.get_mut(i))
                        .ok_or_else(|| {
                            TfplugError::InvalidPath(format!("list index {} out of bounds ({})", idx, len))
                        })?
                }
                (_, step) => {
                    return Err(TfplugError::InvalidPath(format!(
                        "cannot step into {:?} at {}",
                        step, path
                    )))
                }
            };
        }

        match (current, last) {
            (
                Dynamic::Map(m),
                AttributePathStep::AttributeName(name) | AttributePathStep::ElementKeyString(name),
            ) => {
                m.insert(name.clone(), new_value);
                Ok(())
            }
            (Dynamic::List(l), AttributePathStep::ElementKeyInt(idx)) => {
                let idx = usize::try_from(*idx)
                    .map_err(|_| TfplugError::InvalidPath(format!("negative index at {}", path)))?;
                match idx.cmp(&l.len()) {
                    std::cmp::Ordering::Less => l[idx] = new_value,
                    std::cmp::Ordering::Equal => l.push(new_value),
                    std::cmp::Ordering::Greater => {
                        return Err(TfplugError::InvalidPath(format!(
                            "list index {} out of bounds ({})",
                            idx,
                            l.len()
                        )))
                    }
                }
                Ok(())
            }
            (_, step) => Err(TfplugError::InvalidPath(format!(
                "cannot set {:?} at {}",
                step, path
            ))),
        }
    }

    /// Flatten into Terraform's flatmap form: `tags.%`, `filter.#`,
    /// `filter.0.name`. Null and unknown values are omitted.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        match &self.value {
            Dynamic::Map(entries) => {
                for (key, value) in entries {
                    flatten_into(key, value, &mut out);
                }
            }
            other => flatten_into("", other, &mut out),
        }
        out
    }

    fn navigate_path<'a>(&'a self, path: &AttributePath) -> Result<&'a Dynamic> {
        let mut current = &self.value;

        for step in &path.steps {
            current = match (current, step) {
                (
                    Dynamic::Map(m),
                    AttributePathStep::AttributeName(name) | AttributePathStep::ElementKeyString(name),
                ) => m
                    .get(name)
                    .ok_or_else(|| TfplugError::AttributeNotFound(path.to_string()))?,
                (Dynamic::List(l), AttributePathStep::ElementKeyInt(idx)) => usize::try_from(*idx)
                    .ok()
                    .and_then(|i| l.get(i))
                    .ok_or_else(|| TfplugError::AttributeNotFound(path.to_string()))?,
                (Dynamic::Null, _) => return Err(TfplugError::AttributeNotFound(path.to_string())),
                (other, _) => {
                    return Err(TfplugError::InvalidPath(format!(
                        "cannot navigate into {} at {}",
                        other.type_name(),
                        path
                    )))
                }
            };
        }

        Ok(current)
    }
}

fn mismatch(expected: &str, actual: &Dynamic) -> TfplugError {
    TfplugError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

fn flatten_into(prefix: &str, value: &Dynamic, out: &mut BTreeMap<String, String>) {
    let child = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        Dynamic::Null | Dynamic::Unknown => {}
        Dynamic::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Dynamic::Number(n) => {
            out.insert(prefix.to_string(), format_number(*n));
        }
        Dynamic::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Dynamic::List(items) => {
            out.insert(child("#"), items.len().to_string());
            for (idx, item) in items.iter().enumerate() {
                flatten_into(&child(&idx.to_string()), item, out);
            }
        }
        Dynamic::Map(entries) => {
            out.insert(child("%"), entries.len().to_string());
            for (key, item) in entries {
                flatten_into(&child(key), item, out);
            }
        }
    }
}

impl Default for DynamicValue {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Dynamic> for DynamicValue {
    fn from(value: Dynamic) -> Self {
        Self { value }
    }
}

/// AttributePath represents a path to an attribute within a DynamicValue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub steps: Vec<AttributePathStep>,
}

impl AttributePath {
    pub fn new(name: &str) -> Self {
        Self {
            steps: vec![AttributePathStep::AttributeName(name.to_string())],
        }
    }

    pub fn root() -> Self {
        Self { steps: Vec::new() }
    }

    /// Parse a dotted reference such as `tags.Name` or `filter.0.values`.
    /// Numeric segments become list indexes.
    pub fn parse(dotted: &str) -> Self {
        let steps = dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.parse::<i64>() {
                Ok(idx) => AttributePathStep::ElementKeyInt(idx),
                Err(_) => AttributePathStep::AttributeName(segment.to_string()),
            })
            .collect();
        Self { steps }
    }

    pub fn attribute(mut self, name: &str) -> Self {
        self.steps
            .push(AttributePathStep::AttributeName(name.to_string()));
        self
    }

    pub fn index(mut self, idx: i64) -> Self {
        self.steps.push(AttributePathStep::ElementKeyInt(idx));
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.steps
            .push(AttributePathStep::ElementKeyString(key.to_string()));
        self
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            match step {
                AttributePathStep::AttributeName(name) if idx == 0 => write!(f, "{}", name)?,
                AttributePathStep::AttributeName(name) => write!(f, ".{}", name)?,
                AttributePathStep::ElementKeyString(key) => write!(f, "[{:?}]", key)?,
                AttributePathStep::ElementKeyInt(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

/// Individual step in an AttributePath
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributePathStep {
    /// Access attribute by name in object
    AttributeName(String),
    /// Access element by string key (for maps)
    ElementKeyString(String),
    /// Access element by integer index (for lists)
    ElementKeyInt(i64),
}

/// Diagnostic represents a warning or error from the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub summary: String,
    pub detail: String,
    pub attribute: Option<AttributePath>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }

    pub fn with_attribute(mut self, path: AttributePath) -> Self {
        self.attribute = Some(path);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Error => "Error",
            DiagnosticSeverity::Warning => "Warning",
        };
        write!(f, "{}: {}", level, self.summary)?;
        if let Some(path) = &self.attribute {
            write!(f, " (at {})", path)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Config represents configuration values
pub type Config = DynamicValue;

/// State represents resource state values
pub type State = DynamicValue;
