//! Attribute checks run against the state after each step

use super::state::{ResourceState, TestState};

/// A failed check, naming the resource and attribute involved
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct CheckError(pub String);

pub type CheckFunc = Box<dyn Fn(&TestState) -> Result<(), CheckError> + Send + Sync>;

fn lookup<'a>(state: &'a TestState, name: &str) -> Result<&'a ResourceState, CheckError> {
    state
        .get(name)
        .ok_or_else(|| CheckError(format!("Not found: {} in root module", name)))
}

/// Count keys (`tags.%`, `filter.#`) read as "0" when the collection is absent
fn attribute_value<'a>(resource: &'a ResourceState, key: &str) -> Option<&'a str> {
    match resource.attribute(key) {
        Some(value) => Some(value),
        None if key.ends_with(".%") || key.ends_with(".#") => Some("0"),
        None => None,
    }
}

/// Attribute `key` of `name` must equal `value`
pub fn resource_attr(name: &str, key: &str, value: &str) -> CheckFunc {
    let (name, key, value) = (name.to_string(), key.to_string(), value.to_string());
    Box::new(move |state| {
        let resource = lookup(state, &name)?;
        match attribute_value(resource, &key) {
            Some(actual) if actual == value => Ok(()),
            Some(actual) => Err(CheckError(format!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                name, key, value, actual
            ))),
            None => Err(CheckError(format!(
                "{}: Attribute '{}' expected {:?}, got none",
                name, key, value
            ))),
        }
    })
}

/// Attribute `key` of `name` must be present and non-empty
pub fn resource_attr_set(name: &str, key: &str) -> CheckFunc {
    let (name, key) = (name.to_string(), key.to_string());
    Box::new(move |state| {
        let resource = lookup(state, &name)?;
        match resource.attribute(&key) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(CheckError(format!("{}: Attribute '{}' expected to be set", name, key))),
        }
    })
}

/// Attribute `key_first` of `name_first` must equal attribute `key_second`
/// of `name_second`. Both absent counts as equal.
pub fn resource_attr_pair(
    name_first: &str,
    key_first: &str,
    name_second: &str,
    key_second: &str,
) -> CheckFunc {
    let (name_first, key_first) = (name_first.to_string(), key_first.to_string());
    let (name_second, key_second) = (name_second.to_string(), key_second.to_string());
    Box::new(move |state| {
        let first = lookup(state, &name_first)?;
        let second = lookup(state, &name_second)?;

        match (
            attribute_value(first, &key_first),
            attribute_value(second, &key_second),
        ) {
            (None, None) => Ok(()),
            (Some(a), Some(b)) if a == b => Ok(()),
            (Some(a), Some(b)) => Err(CheckError(format!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                name_second, key_second, a, b
            ))),
            (Some(_), None) => Err(CheckError(format!(
                "{}: Attribute '{}' not found",
                name_second, key_second
            ))),
            (None, Some(_)) => Err(CheckError(format!(
                "{}: Attribute '{}' not found",
                name_first, key_first
            ))),
        }
    })
}

/// Run checks in order and stop at the first failure
pub fn compose(checks: Vec<CheckFunc>) -> CheckFunc {
    Box::new(move |state| {
        let total = checks.len();
        for (idx, check) in checks.iter().enumerate() {
            check(state).map_err(|e| {
                CheckError(format!("Check {}/{} error: {}", idx + 1, total, e))
            })?;
        }
        Ok(())
    })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<CheckFunc>) -> CheckFunc {
    Box::new(move |state| {
        let failures: Vec<String> = checks
            .iter()
            .filter_map(|check| check(state).err())
            .map(|e| e.0)
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CheckError(failures.join("\n")))
        }
    })
}
