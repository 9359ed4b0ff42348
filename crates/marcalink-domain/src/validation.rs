//! Validation for names that end up as directory or file names

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DomainError, Result};

lazy_static! {
    static ref SAFE_NAME: Regex = Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap();
}

/// Validate a project name and return it trimmed.
///
/// Names must be non-empty after trimming and use only letters, digits,
/// dots, underscores and hyphens. `.` and `..` are rejected because they
/// would resolve outside the project directory.
pub fn validate_project_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidProjectName(
            "Project name cannot be empty.".to_string(),
        ));
    }
    if !SAFE_NAME.is_match(trimmed) || is_dot_segment(trimmed) {
        return Err(DomainError::InvalidProjectName(
            "Invalid project name. Use only letters, numbers, dots, underscores, and hyphens."
                .to_string(),
        ));
    }
    Ok(trimmed)
}

/// Validate a paper id before it is used as `<id>.json`.
pub fn validate_paper_id(id: &str) -> Result<&str> {
    if id.is_empty() || !SAFE_NAME.is_match(id) || is_dot_segment(id) {
        return Err(DomainError::InvalidPaperId(id.to_string()));
    }
    Ok(id)
}

/// Whether a name passes project-name validation
pub fn is_valid_project_name(name: &str) -> bool {
    validate_project_name(name).is_ok()
}

fn is_dot_segment(name: &str) -> bool {
    name == "." || name == ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_project_names() {
        for name in ["tcc-001", "Thesis_2024", "a.b.c", "X", "snow-ball_v2.1"] {
            assert_eq!(validate_project_name(name), Ok(name));
        }
    }

    #[test]
    fn test_project_name_is_trimmed() {
        assert_eq!(validate_project_name("  review  "), Ok("review"));
    }

    #[test]
    fn test_invalid_project_names() {
        for name in ["", "   ", "has space", "slash/name", "..", ".", "ação", "a\\b"] {
            assert!(validate_project_name(name).is_err(), "accepted {:?}", name);
        }
    }

    #[test]
    fn test_empty_name_message() {
        let err = validate_project_name(" ").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_paper_id_validation() {
        assert!(validate_paper_id("p_811c9dc5").is_ok());
        assert!(validate_paper_id("../etc").is_err());
        assert!(validate_paper_id("").is_err());
    }
}
