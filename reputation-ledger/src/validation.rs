//! Request payload validation
//!
//! Field limits checked before any lock is taken. Each check reports the
//! first offending field as a field-scoped [`Error::Validation`].

use crate::types::NewQuestion;
use crate::{Error, Result};

/// Longest question title
pub const MAX_TITLE_LEN: usize = 50;

/// Longest question or answer body
pub const MAX_BODY_LEN: usize = 300;

/// Display name length bounds
pub const DISPLAY_NAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;

fn check_text(field: &'static str, value: &str, max: usize, message: &str) -> Result<()> {
    let len = value.trim().chars().count();
    if len == 0 || value.chars().count() > max {
        return Err(Error::Validation {
            field,
            message: message.to_string(),
        });
    }
    Ok(())
}

/// Validate a question payload (create and update)
pub fn question(input: &NewQuestion) -> Result<()> {
    check_text("title", &input.title, MAX_TITLE_LEN, "Title is required (max length: 50)")?;
    check_text("body", &input.body, MAX_BODY_LEN, "Body is required (max length: 300)")?;

    if input.priority_level < 0 {
        return Err(Error::Validation {
            field: "priority_level",
            message: "Priority level must be a number not greater than your credits".to_string(),
        });
    }

    Ok(())
}

/// Validate an answer body
pub fn answer_body(body: &str) -> Result<()> {
    check_text("body", body, MAX_BODY_LEN, "Body is required (max length: 300)")
}

/// Validate a display name: letters and spaces only
pub fn display_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    let valid = DISPLAY_NAME_LEN.contains(&len)
        && !name.trim().is_empty()
        && name.chars().all(|c| c.is_alphabetic() || c == ' ');

    if !valid {
        return Err(Error::Validation {
            field: "name",
            message: "Name is required (letters and spaces, 3 to 20 characters)".to_string(),
        });
    }

    Ok(())
}
