//! # Validated Value Objects
//!
//! Small newtypes that enforce spec §3 invariants at construction time:
//! validated at the boundary, with `Deref`/`as_str`/`as_i32` accessors for
//! the inner value.

use std::fmt;

/// A priority in `[1..10]`, lower is more urgent (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(i32);

impl Priority {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 10;

    /// Builds a priority, rejecting values outside `[1..10]`.
    pub fn new(value: i32) -> Result<Self, String> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "priority {value} out of range [{}..{}]",
                Self::MIN,
                Self::MAX
            ))
        }
    }

    /// Clamps into range instead of rejecting, for producers that compute a
    /// priority from a continuous signal (e.g. days overdue).
    pub fn clamped(value: i32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bound on retry attempts, `[1..10]` per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAttempts(i32);

impl MaxAttempts {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 10;

    pub fn new(value: i32) -> Result<Self, String> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "max_attempts {value} out of range [{}..{}]",
                Self::MIN,
                Self::MAX
            ))
        }
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

/// A validated, lowercased email address.
///
/// Kept intentionally simple (no full RFC 5322 parser); the `validator`
/// crate's email check does the validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("email address must not be empty".into());
        }
        if !validator::ValidateEmail::validate_email(&trimmed) {
            return Err(format!("'{trimmed}' is not a valid email address"));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-empty, length-bounded piece of free text (template subject/body,
/// notification title/message). Bound chosen generously; spec only requires
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    pub const MAX_LEN: usize = 10_000;

    pub fn new(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err("text must not be empty".into());
        }
        if raw.len() > Self::MAX_LEN {
            return Err(format!("text exceeds {} bytes", Self::MAX_LEN));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(11).is_err());
        assert!(Priority::new(1).is_ok());
        assert!(Priority::new(10).is_ok());
    }

    #[test]
    fn priority_clamped_saturates() {
        assert_eq!(Priority::clamped(-5).value(), 1);
        assert_eq!(Priority::clamped(99).value(), 10);
    }

    #[test]
    fn email_address_lowercases_and_trims() {
        let email = EmailAddress::new("  User@Example.COM  ").unwrap();
        assert_eq!(email.as_str(), "user@example.com");
    }

    #[test]
    fn email_address_rejects_malformed() {
        assert!(EmailAddress::new("not-an-email").is_err());
        assert!(EmailAddress::new("").is_err());
    }

    #[test]
    fn non_empty_text_rejects_blank() {
        assert!(NonEmptyText::new("   ").is_err());
        assert!(NonEmptyText::new("hello").is_ok());
    }
}
