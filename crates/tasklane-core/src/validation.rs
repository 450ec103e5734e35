//! # Validation Module
//!
//! Checks applied to rows the user creates locally. Rows arriving from the
//! service are trusted and never pass through here.
//!
//! ## Usage
//! ```rust
//! use tasklane_core::validation::{validate_task_name, validate_sequence};
//!
//! validate_task_name("Buy milk").unwrap();
//! validate_sequence(3).unwrap();
//! ```

use crate::error::ValidationError;
use crate::{MAX_CHECKLIST_ITEMS, MAX_DETAILS_LEN, MAX_FOLDER_NAME_LEN, MAX_TASK_NAME_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn validate_text(field: &'static str, value: &str, max: usize) -> ValidationResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(ValidationError::TooLong {
            field,
            max,
            actual: len,
        });
    }
    Ok(())
}

/// Validates a task name: non-blank, at most [`MAX_TASK_NAME_LEN`] characters.
pub fn validate_task_name(name: &str) -> ValidationResult<()> {
    validate_text("task name", name, MAX_TASK_NAME_LEN)
}

/// Validates a folder name: non-blank, at most [`MAX_FOLDER_NAME_LEN`] characters.
pub fn validate_folder_name(name: &str) -> ValidationResult<()> {
    validate_text("folder name", name, MAX_FOLDER_NAME_LEN)
}

/// Validates a checklist item name.
pub fn validate_item_name(name: &str) -> ValidationResult<()> {
    validate_text("item name", name, MAX_TASK_NAME_LEN)
}

/// Details may be empty but are bounded.
pub fn validate_details(details: &str) -> ValidationResult<()> {
    let len = details.chars().count();
    if len > MAX_DETAILS_LEN {
        return Err(ValidationError::TooLong {
            field: "details",
            max: MAX_DETAILS_LEN,
            actual: len,
        });
    }
    Ok(())
}

/// Checklist sequences start at 0.
pub fn validate_sequence(sequence: i64) -> ValidationResult<()> {
    if sequence < 0 {
        return Err(ValidationError::BelowMinimum {
            field: "sequence",
            min: 0,
            actual: sequence,
        });
    }
    Ok(())
}

/// A task holds at most [`MAX_CHECKLIST_ITEMS`] items.
pub fn validate_checklist_capacity(existing: usize) -> ValidationResult<()> {
    if existing >= MAX_CHECKLIST_ITEMS {
        return Err(ValidationError::LimitReached {
            field: "checklist",
            max: MAX_CHECKLIST_ITEMS,
        });
    }
    Ok(())
}
