//! Validation of registry entries.
//!
//! Every entry is checked when the registry is loaded; all problems are
//! collected and reported together so an operator can fix a config file in one pass.

use std::fmt;

/// Trait for validating configuration objects.
pub trait Validator {
    /// Validate the state of the object.
    fn validate(&self) -> Result<(), String>;
}

/// Validation error with a readable message and an optional fix hint.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    pub message: String,
    /// Suggestion for how to fix the error
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn empty_field(field: &str, label: &str) -> Self {
        Self::new(field, format!("{} must not be empty", label))
    }

    pub fn unsafe_path_segment(field: &str, value: &str) -> Self {
        Self::new(
            field,
            format!("'{}' is not a plain name", value),
        )
        .with_suggestion("use letters, digits, '-' and '_' only; no path separators or '..'")
    }

    pub fn unsafe_relative_path(field: &str, value: &str) -> Self {
        Self::new(field, format!("'{}' escapes the configured root", value))
            .with_suggestion("use a relative path without '..' or a leading '/'")
    }

    pub fn non_positive_dimension(field: &str, value: f64) -> Self {
        Self::new(field, format!("page dimension {} must be positive", value))
            .with_suggestion("give width_pt and height_pt in points, e.g. 900 x 500")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, ". {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors with formatted output.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn to_message(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }

        let mut parts = vec![format!(
            "validation failed: {} problem(s) found",
            self.errors.len()
        )];

        for (i, error) in self.errors.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, error));
        }

        parts.join("\n")
    }

    /// Ok if no errors, Err with formatted message otherwise
    pub fn into_result(self) -> Result<(), String> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.to_message())
        }
    }
}

// ============================================================================
// Validation functions
// ============================================================================

/// Records an error and returns false when `value` is blank.
pub fn validate_required(value: &str, field: &str, label: &str, errors: &mut ValidationErrors) -> bool {
    if value.trim().is_empty() {
        errors.add(ValidationError::empty_field(field, label));
        return false;
    }
    true
}

/// A single file-name component: no separators, no dot-only names.
pub fn validate_plain_name(value: &str, field: &str, errors: &mut ValidationErrors) {
    if !validate_required(value, field, "Name", errors) {
        return;
    }
    let trimmed = value.trim();

    let plain = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !plain {
        errors.add(ValidationError::unsafe_path_segment(field, trimmed));
    }
}

/// A relative path that stays under its root.
pub fn validate_relative_path(value: &str, field: &str, label: &str, errors: &mut ValidationErrors) {
    if !validate_required(value, field, label, errors) {
        return;
    }
    let trimmed = value.trim();

    let escapes = trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || trimmed.split(['/', '\\']).any(|segment| segment == "..");
    if escapes {
        errors.add(ValidationError::unsafe_relative_path(field, trimmed));
    }
}

pub fn validate_positive(value: f64, field: &str, errors: &mut ValidationErrors) {
    if !(value.is_finite() && value > 0.0) {
        errors.add(ValidationError::non_positive_dimension(field, value));
    }
}
