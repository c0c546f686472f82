//! Input sanitization for session creation
//!
//! Everything here runs before any resource is touched, so failures are
//! always `CompanionError::Validation`.

use std::path::{Path, PathBuf};

use crate::error::{CompanionError, Result};

/// Remove control characters other than newline and tab
#[must_use]
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Clean a prompt and enforce its length bound
///
/// # Errors
/// Returns `CompanionError::Validation` for empty prompts or prompts longer
/// than `max_chars` characters
pub fn sanitize_prompt(prompt: &str, max_chars: usize) -> Result<String> {
    let cleaned = strip_control_chars(prompt);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(CompanionError::validation("Prompt must not be empty"));
    }
    let length = cleaned.chars().count();
    if length > max_chars {
        return Err(CompanionError::validation(format!(
            "Prompt is {length} characters, limit is {max_chars}"
        )));
    }
    Ok(cleaned.to_string())
}

/// Resolve a working directory and check it may host an agent
///
/// The path is expanded (`~`), canonicalized, and must be a readable
/// directory that is neither a forbidden path nor inside one. `/` in the
/// forbidden list matches only the root itself.
///
/// # Errors
/// Returns `CompanionError::Validation` describing the first failed check
pub fn validate_working_directory(raw: &str, forbidden: &[PathBuf]) -> Result<PathBuf> {
    let cleaned = strip_control_chars(raw);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(CompanionError::validation("Working directory must not be empty"));
    }

    let expanded = expand_home(cleaned);
    let canonical = std::fs::canonicalize(&expanded).map_err(|e| {
        CompanionError::validation(format!("Working directory {cleaned} is not accessible: {e}"))
    })?;

    if !canonical.is_dir() {
        return Err(CompanionError::validation(format!(
            "Working directory {} is not a directory",
            canonical.display()
        )));
    }

    if let Err(e) = std::fs::read_dir(&canonical) {
        return Err(CompanionError::validation(format!(
            "Working directory {} is not readable: {e}",
            canonical.display()
        )));
    }

    if let Some(hit) = forbidden.iter().find(|f| is_forbidden(&canonical, f)) {
        return Err(CompanionError::validation(format!(
            "Working directory {} is inside forbidden path {}",
            canonical.display(),
            hit.display()
        )));
    }

    Ok(canonical)
}

fn is_forbidden(candidate: &Path, forbidden: &Path) -> bool {
    if forbidden == Path::new("/") {
        return candidate == forbidden;
    }
    candidate.starts_with(forbidden)
}

fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path.strip_prefix("~"), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}
