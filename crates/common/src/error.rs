//! Configuration-level error types

use thiserror::Error;

/// Errors raised while loading and validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL for {field}: {value} (must start with http:// or https://)")]
    InvalidUrl { field: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_names_field_and_value() {
        let err = Error::InvalidUrl {
            field: "api.base_url",
            value: "hikeapi.local".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api.base_url"), "got: {msg}");
        assert!(msg.contains("hikeapi.local"), "got: {msg}");
    }

    #[test]
    fn io_error_converts_with_prefix() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }

    #[test]
    fn config_error_display() {
        let err = Error::Config("timeout_secs must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: timeout_secs must be greater than 0"
        );
    }
}
