//! Field-level validation for inbound DTOs.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Validation failures keyed by field name.
///
/// Serializes as `{"field": ["message", ...]}`, which is the `errors`
/// member of a validation problem response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Converts an accumulated set of errors into a `Result`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Types that can check their own field constraints.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Checks that a string is not blank and at most `max` characters.
pub(crate) fn required_max(
    errors: &mut ValidationErrors,
    field: &str,
    value: &str,
    max: usize,
) {
    if value.trim().is_empty() {
        errors.add(field, format!("'{field}' must not be empty."));
    } else if value.chars().count() > max {
        errors.add(
            field,
            format!("'{field}' must be {max} characters or fewer."),
        );
    }
}

/// Checks an optional string's length when it is present.
pub(crate) fn optional_max(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) {
    if let Some(value) = value
        && value.chars().count() > max
    {
        errors.add(
            field,
            format!("'{field}' must be {max} characters or fewer."),
        );
    }
}
