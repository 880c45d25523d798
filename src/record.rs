//! The validated user record and the validator that builds it from a
//! comma-split line.
//!
//! The input format is positional with no quoting or escaping: a comma inside
//! a field shifts every following field and the line is rejected for having
//! the wrong field count.

use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Number of comma-separated fields a line must carry.
pub const FIELD_COUNT: usize = 5;

/// Field delimiter of the input format.
pub const DELIMITER: char = ',';

/// A validated user record, serialized as one JSON object per output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub full_name: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Record {
    /// Serializes the record as a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Builds a [`Record`] from the positional fields of one line.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, fields: &[&str]) -> Result<Record, ValidationError>;
}

/// Validator for the `id,username,email,is_active,full_name` layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserValidator;

impl RecordValidator for UserValidator {
    fn validate(&self, fields: &[&str]) -> Result<Record, ValidationError> {
        let [id, username, email, is_active, full_name] = fields else {
            return Err(ValidationError::FieldCount {
                expected: FIELD_COUNT,
                found: fields.len(),
            });
        };

        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|source| ValidationError::InvalidId {
                value: id.to_string(),
                source,
            })?;

        Ok(Record {
            id,
            username: username.to_string(),
            email: email.to_string(),
            is_active: parse_is_active(is_active),
            full_name: Some(full_name.to_string()),
        })
    }
}

/// Only a case-insensitive `"true"` is true; everything else is false.
pub fn parse_is_active(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Strips surrounding whitespace (including the line terminator) and splits
/// on the delimiter.
pub fn split_fields(raw: &str) -> Vec<&str> {
    raw.trim().split(DELIMITER).collect()
}
