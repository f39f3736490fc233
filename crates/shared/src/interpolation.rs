//! Environment variable interpolation for configuration text.
//!
//! Placeholders of the form `${NAME}` inside double-quoted values are replaced
//! with the value of the environment variable `NAME`. `${?NAME}` marks the
//! variable as optional: when it is unset the placeholder is left untouched
//! instead of being reported as missing.

use thiserror::Error;

lazy_static::lazy_static! {
    static ref QUOTED_VALUE_REGEX: regex::Regex =
        regex::Regex::new(r#":\s*"([^"]*\$\{\??[A-Za-z0-9_]+\}[^"]*)""#).unwrap();
    static ref PLACEHOLDER_REGEX: regex::Regex =
        regex::Regex::new(r"\$\{(\??)([A-Za-z0-9_]+)\}").unwrap();
}

/// Errors raised while expanding placeholders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
}

/// Expand placeholders using the process environment.
pub fn interpolate_env(content: &str) -> Result<String, InterpolationError> {
    interpolate_with(content, |name| std::env::var(name).ok())
}

/// Expand placeholders using a caller-supplied lookup.
///
/// Every unresolved required variable is collected so the caller can report
/// all of them at once. An empty value counts as unresolved.
pub fn interpolate_with<F>(content: &str, lookup: F) -> Result<String, InterpolationError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Vec<String> = Vec::new();

    let expanded = QUOTED_VALUE_REGEX.replace_all(content, |caps: &regex::Captures<'_>| {
        let whole = &caps[0];
        let value = &caps[1];
        let replaced = expand_value(value, &lookup, &mut missing);
        whole.replacen(value, &replaced, 1)
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(InterpolationError::MissingVariables(missing))
    }
}

fn expand_value<F>(value: &str, lookup: &F, missing: &mut Vec<String>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER_REGEX
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let optional = !caps[1].is_empty();
            let name = &caps[2];
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => {
                    if !optional && !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
