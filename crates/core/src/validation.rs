//! Input validation for the employee API.
//!
//! Every check runs before the datastore is touched. Failures are collected per
//! field so a client sees all problems with a payload at once.

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::pagination::{Pagination, DEFAULT_LIMIT, DEFAULT_PAGE};
use crate::types::EmployeeFields;

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Non-empty collection of field errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", Summary(.0))]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(path, message)])
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.0
    }

    /// Returns `true` when the named field was rejected.
    #[cfg(test)]
    pub(crate) fn has_field(&self, path: &str) -> bool {
        self.0.iter().any(|error| error.path == path)
    }
}

struct Summary<'a>(&'a [FieldError]);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, error) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.path, error.message)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Collector(Vec<FieldError>);

impl Collector {
    fn push(&mut self, path: &str, message: impl Into<String>) {
        self.0.push(FieldError::new(path, message));
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.0.is_empty() {
            Ok(value())
        } else {
            Err(ValidationErrors(self.0))
        }
    }
}

/// Validates a JSON employee payload into a full field set.
///
/// Unknown keys, including `id`, are ignored.
pub fn validate_employee(payload: &Value) -> Result<EmployeeFields, ValidationErrors> {
    let Some(object) = payload.as_object() else {
        return Err(ValidationErrors::single("body", "expected a JSON object"));
    };

    let mut errors = Collector::default();

    let first_name = required_name(object, "firstName", &mut errors);
    let last_name = required_name(object, "lastName", &mut errors);
    let phone = required_string(object, "phone", &mut errors);
    let address = required_string(object, "address", &mut errors);
    let avatar = optional_avatar(object, &mut errors);
    let hire_date = hire_date(object, &mut errors);
    let is_active = match object.get("isActive") {
        None | Some(Value::Null) => Some(true),
        Some(Value::Bool(value)) => Some(*value),
        Some(_) => {
            errors.push("isActive", "expected a boolean");
            None
        }
    };
    let department_id = department_id(object, &mut errors);

    match (
        first_name,
        last_name,
        phone,
        address,
        avatar,
        hire_date,
        is_active,
        department_id,
    ) {
        (
            Some(first_name),
            Some(last_name),
            Some(phone),
            Some(address),
            Some(avatar),
            Some(hire_date),
            Some(is_active),
            Some(department_id),
        ) if errors.0.is_empty() => Ok(EmployeeFields {
            first_name,
            last_name,
            phone,
            address,
            avatar,
            hire_date,
            is_active,
            department_id,
        }),
        _ => Err(ValidationErrors(errors.0)),
    }
}

/// Validates raw `page`/`limit` query values, applying the defaults when absent.
pub fn validate_pagination(
    page: Option<&str>,
    limit: Option<&str>,
) -> Result<Pagination, ValidationErrors> {
    let mut errors = Collector::default();
    let page = positive_query_value("page", page, DEFAULT_PAGE, &mut errors);
    let limit = positive_query_value("limit", limit, DEFAULT_LIMIT, &mut errors);

    errors.finish(|| Pagination::new(page, limit).unwrap_or_default())
}

/// Validates a record identifier taken from a path or query segment.
pub fn validate_id(field: &str, raw: &str) -> Result<i64, ValidationErrors> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id >= 1 => Ok(id),
        Ok(_) => Err(ValidationErrors::single(field, "must be greater than or equal to 1")),
        Err(_) => Err(ValidationErrors::single(field, "expected an integer")),
    }
}

fn required_name(object: &Map<String, Value>, key: &str, errors: &mut Collector) -> Option<String> {
    let value = required_string(object, key, errors)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(key, "must not be empty");
        return None;
    }
    Some(trimmed.to_string())
}

fn required_string(
    object: &Map<String, Value>,
    key: &str,
    errors: &mut Collector,
) -> Option<String> {
    match object.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        None | Some(Value::Null) => {
            errors.push(key, "is required");
            None
        }
        Some(_) => {
            errors.push(key, "expected a string");
            None
        }
    }
}

fn optional_avatar(object: &Map<String, Value>, errors: &mut Collector) -> Option<Option<String>> {
    match object.get("avatar") {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(value)) if value.trim().is_empty() => Some(None),
        Some(Value::String(value)) => match Url::parse(value.trim()) {
            Ok(_) => Some(Some(value.trim().to_string())),
            Err(_) => {
                errors.push("avatar", "expected an absolute URL");
                None
            }
        },
        Some(_) => {
            errors.push("avatar", "expected a string");
            None
        }
    }
}

fn hire_date(object: &Map<String, Value>, errors: &mut Collector) -> Option<NaiveDate> {
    let raw = required_string(object, "hireDate", errors)?;
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.date_naive());
    }
    errors.push("hireDate", "expected a date (YYYY-MM-DD) or RFC 3339 timestamp");
    None
}

fn department_id(object: &Map<String, Value>, errors: &mut Collector) -> Option<i64> {
    match object.get("departmentId") {
        Some(Value::Number(number)) => match number.as_i64() {
            Some(id) if id >= 1 => Some(id),
            Some(_) => {
                errors.push("departmentId", "must be greater than or equal to 1");
                None
            }
            None => {
                errors.push("departmentId", "expected an integer");
                None
            }
        },
        None | Some(Value::Null) => {
            errors.push("departmentId", "is required");
            None
        }
        Some(_) => {
            errors.push("departmentId", "expected an integer");
            None
        }
    }
}

fn positive_query_value(
    key: &str,
    raw: Option<&str>,
    default: u32,
    errors: &mut Collector,
) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<u32>() {
        Ok(0) => {
            errors.push(key, "must be greater than or equal to 1");
            default
        }
        Ok(value) => value,
        Err(_) => {
            errors.push(key, "expected a positive integer");
            default
        }
    }
}
