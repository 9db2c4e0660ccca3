//! Shared utility functions for provider adapters.

use llmesh_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve an endpoint's API key from the environment variable named in its
/// `api_key_env` config field.
pub fn resolve_api_key(api_key_env: Option<&str>) -> Result<String> {
    let env_var = api_key_env.ok_or_else(|| {
        Error::Auth("endpoint has no api_key_env configured".into())
    })?;
    std::env::var(env_var).map_err(|_| {
        Error::Auth(format!(
            "environment variable '{env_var}' not set or not valid UTF-8"
        ))
    })
}
