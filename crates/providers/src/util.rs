//! Shared utility functions for provider adapters.

use tl_domain::error::{Error, Result};

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

/// Narrow a provider-reported count, saturating instead of wrapping.
pub(crate) fn saturating_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Read the API key from the named environment variable.
pub fn resolve_api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(Error::Config(format!(
            "environment variable '{env_var}' not set or empty"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "TL_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        assert_eq!(resolve_api_key(var_name).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let err = resolve_api_key("TL_TEST_NONEXISTENT_VAR_8888").unwrap_err();
        assert!(err.to_string().contains("TL_TEST_NONEXISTENT_VAR_8888"));
    }
}
