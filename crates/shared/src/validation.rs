//! Common validation utilities.

use validator::ValidationError;

/// Maximum length of a job name.
const MAX_JOB_NAME_LENGTH: usize = 128;

/// Validates that a job name is usable as a single directory component.
///
/// Job names double as the name of the job's backup directory under the
/// storage root, so path separators and relative components are rejected.
pub fn validate_job_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("job_name_empty");
        err.message = Some("Job name must not be empty".into());
        return Err(err);
    }

    if name.len() > MAX_JOB_NAME_LENGTH {
        let mut err = ValidationError::new("job_name_length");
        err.message = Some(format!("Job name must be at most {MAX_JOB_NAME_LENGTH} characters").into());
        return Err(err);
    }

    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        let mut err = ValidationError::new("job_name_path");
        err.message = Some("Job name must be a single path component".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a retention value is strictly positive.
pub fn validate_positive(value: i64) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("positive");
        err.message = Some("Value must be greater than zero".into());
        Err(err)
    }
}

/// Validates that a string looks like an http(s) URL.
pub fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("http_url");
        err.message = Some("URL must start with http:// or https://".into());
        Err(err)
    }
}
