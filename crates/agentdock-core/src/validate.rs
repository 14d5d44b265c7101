//! Input validation for caller-supplied commands and repository URLs.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Schemes accepted for repository URLs.
const ALLOWED_SCHEMES: [&str; 5] = ["http", "https", "git", "ssh", "file"];

static FORBIDDEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"rm\s+-rf\s+/",
        r"chmod\s+777",
        r"\bsudo\b",
        r"\|\s*nc\s+",
        r"curl\s+\S+\s*\|\s*sh",
        r"eval\s*\(",
        r"exec\s*\(",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static SCP_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^git@[\w.-]+:[\w.-]+/[\w.-]+$").ok());

/// Validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Input exceeds {max} bytes ({size} given)")]
    TooLarge { size: usize, max: usize },
    #[error("Command contains a forbidden pattern: {0}")]
    ForbiddenPattern(String),
    #[error("Unsupported repository URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Malformed repository URL: {0}")]
    MalformedUrl(String),
}

/// Reject prompts longer than `max` bytes.
///
/// # Errors
/// Returns [`ValidationError::TooLarge`] when the input is over the limit.
pub fn validate_input_size(input: &str, max: usize) -> Result<(), ValidationError> {
    if input.len() > max {
        tracing::warn!(size = input.len(), max, "Input size limit exceeded");
        return Err(ValidationError::TooLarge {
            size: input.len(),
            max,
        });
    }
    Ok(())
}

/// Reject commands matching a known-dangerous shell pattern.
///
/// # Errors
/// Returns the first matching pattern.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if let Some(pattern) = FORBIDDEN_PATTERNS.iter().find(|p| p.is_match(command)) {
        tracing::warn!(pattern = pattern.as_str(), "Forbidden command pattern detected");
        return Err(ValidationError::ForbiddenPattern(pattern.as_str().to_string()));
    }
    Ok(())
}

/// Accept URL-form repositories with a known scheme, or scp-form
/// `git@host:owner/repo(.git)`.
///
/// # Errors
/// Returns error for unknown schemes and unparseable URLs.
pub fn validate_git_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("git@") {
        return match SCP_URL.as_ref() {
            Some(re) if re.is_match(url) => Ok(()),
            _ => Err(ValidationError::MalformedUrl(url.to_string())),
        };
    }

    let parsed = Url::parse(url).map_err(|_| ValidationError::MalformedUrl(url.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        tracing::warn!(scheme = parsed.scheme(), "Repository URL scheme not allowed");
        return Err(ValidationError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    Ok(())
}
