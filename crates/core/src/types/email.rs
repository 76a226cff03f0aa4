//! Email address type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("email cannot be empty")]
    Empty,
    #[error("email must be at most {max} characters")]
    TooLong { max: usize },
    #[error("email must contain exactly one @ symbol")]
    BadAtSymbol,
    #[error("email local part cannot be empty")]
    EmptyLocalPart,
    #[error("email domain must contain a dot")]
    InvalidDomain,
    #[error("email cannot contain whitespace")]
    Whitespace,
}

/// An email address, as typed into the sign-in and node transfer forms.
///
/// Surrounding whitespace is trimmed before validation. The domain must
/// contain at least one dot with text on both sides; anything stricter is
/// left to the identity provider.
///
/// ```
/// use epochmine_core::Email;
///
/// assert!(Email::parse(" buyer@example.com ").is_ok());
/// assert!(Email::parse("buyer@localhost").is_err());
/// assert!(Email::parse("a@b@c.com").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from user input.
    ///
    /// # Errors
    ///
    /// Returns an [`EmailError`] describing the first problem found.
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmailError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(EmailError::Whitespace);
        }

        let mut parts = s.split('@');
        let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(EmailError::BadAtSymbol);
        };
        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart);
        }
        let domain_ok = domain
            .rsplit_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty());
        if !domain_ok {
            return Err(EmailError::InvalidDomain);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the email as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part (after the @).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, d)| d)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        for input in ["user@example.com", "first.last+tag@mail.example.co.uk"] {
            assert!(Email::parse(input).is_ok(), "{input}");
        }
    }

    #[test]
    fn test_trims_input() {
        let email = Email::parse("  user@example.com\n").unwrap();
        assert_eq!(email.as_str(), "user@example.com");
        assert_eq!(email.domain(), "example.com");
    }

    #[test]
    fn test_invalid_emails() {
        assert_eq!(Email::parse("   "), Err(EmailError::Empty));
        assert_eq!(Email::parse("nope"), Err(EmailError::BadAtSymbol));
        assert_eq!(Email::parse("a@b@c.com"), Err(EmailError::BadAtSymbol));
        assert_eq!(Email::parse("@example.com"), Err(EmailError::EmptyLocalPart));
        assert_eq!(Email::parse("user@example"), Err(EmailError::InvalidDomain));
        assert_eq!(Email::parse("user@.com"), Err(EmailError::InvalidDomain));
        assert_eq!(Email::parse("us er@example.com"), Err(EmailError::Whitespace));
    }

    #[test]
    fn test_too_long() {
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(matches!(
            Email::parse(&long),
            Err(EmailError::TooLong { max: 254 })
        ));
    }
}
