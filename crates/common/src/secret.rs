//! Redacting wrapper for bearer tokens and other credentials

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value. Prints as `[REDACTED]` and is zeroized on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Never pass the result to a log macro.
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Take the inner value out, leaving a zeroized default behind.
    pub fn into_inner(mut self) -> T
    where
        T: Default,
    {
        std::mem::take(&mut self.0)
    }
}

impl Secret<String> {
    /// `Authorization` header value for a bearer token.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_are_redacted() {
        let token = Secret::new(String::from("eyJhbGciOiJIUzI1NiJ9.payload.sig"));
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
    }

    #[test]
    fn bearer_formats_authorization_value() {
        let token = Secret::from(String::from("at_123"));
        assert_eq!(token.bearer(), "Bearer at_123");
    }

    #[test]
    fn into_inner_returns_value() {
        let token = Secret::new(String::from("at_456"));
        assert_eq!(token.into_inner(), "at_456");
    }

    #[test]
    fn expose_returns_value() {
        let token = Secret::new(String::from("at_789"));
        assert_eq!(token.expose(), "at_789");
    }
}
