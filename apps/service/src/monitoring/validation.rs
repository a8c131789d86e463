//! Target validation.
//!
//! Everything here runs before a target is handed to the registry, so a
//! malformed request never reaches the scheduler.

use url::Url;

use crate::error::ValidationError;

/// Validate an HTTP/HTTPS endpoint and return its parsed form.
pub fn validate_http_endpoint(target: &str) -> Result<Url, ValidationError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let url = Url::parse(target).map_err(|e| {
        // A bare host parses as a relative URL error, tell the user what is missing
        if !target.contains("://") {
            ValidationError::MissingScheme
        } else {
            ValidationError::InvalidUrl(e.to_string())
        }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingHost);
    }

    Ok(url)
}

/// Project ids are opaque but must be present.
pub fn validate_project_id(project_id: &str) -> Result<(), ValidationError> {
    if project_id.trim().is_empty() {
        return Err(ValidationError::MissingField("projectId"));
    }
    Ok(())
}
