//! Shell-composition validation invariants: regex allow-lists and
//! shell-metacharacter detection, enforced as hard rejections rather than
//! warnings — nothing reaches a shell command unless it matches its
//! ref/URL/key pattern and is single-quote escaped.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("'{0}' is not a valid git ref or repository name")]
    InvalidRef(String),
    #[error("'{0}' is not a valid URL or uses an unsupported scheme")]
    InvalidUrl(String),
    #[error("'{0}' is not a valid environment variable key")]
    InvalidEnvKey(String),
}

static REF_RE: &str = r"^[A-Za-z0-9._/-]+$";
static ENV_KEY_RE: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";
const ALLOWED_SCHEMES: [&str; 4] = ["https", "http", "git", "ssh"];

/// Validates a branch name or bare repository name against
/// `^[A-Za-z0-9._/-]+$`.
pub fn validate_ref(value: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new(REF_RE).expect("static regex is valid");
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidRef(value.to_string()))
    }
}

/// Validates a URL parses and uses an allowed scheme.
pub fn validate_url(value: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(value).map_err(|_| ValidationError::InvalidUrl(value.to_string()))?;
    if ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidUrl(value.to_string()))
    }
}

/// Validates an environment-variable key against
/// `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_env_key(value: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new(ENV_KEY_RE).expect("static regex is valid");
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEnvKey(value.to_string()))
    }
}

/// Single-quotes `value` for safe interpolation into a POSIX shell command,
/// using the standard `'\''` escape.
#[must_use]
pub fn shell_single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_ref_accepts_typical_branch_names() {
        assert!(validate_ref("fix/claude-task-123").is_ok());
        assert!(validate_ref("feature_branch.v2").is_ok());
    }

    #[test]
    fn validate_ref_rejects_shell_metacharacters() {
        assert!(validate_ref("main; rm -rf /").is_err());
        assert!(validate_ref("$(whoami)").is_err());
    }

    #[test]
    fn validate_url_accepts_allowed_schemes() {
        assert!(validate_url("https://github.com/acme/widgets").is_ok());
        assert!(validate_url("git@github.com:acme/widgets.git").is_err());
    }

    #[test]
    fn validate_url_rejects_disallowed_schemes() {
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn validate_env_key_rejects_leading_digit() {
        assert!(validate_env_key("9TOKEN").is_err());
        assert!(validate_env_key("GITHUB_TOKEN").is_ok());
    }

    #[test]
    fn shell_single_quote_escapes_embedded_quotes() {
        assert_eq!(shell_single_quote("it's fine"), r"'it'\''s fine'");
    }
}
