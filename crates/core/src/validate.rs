//! Field-level form validation.
//!
//! Checks run before anything is sent to the backend. Failures are collected
//! per field in [`FieldErrors`] so a form can be re-rendered with every
//! message next to its input at once.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Country code used when the form leaves it blank.
pub const DEFAULT_COUNTRY_CODE: &str = "+86";

static COUNTRY_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\d{1,4}$").expect("Invalid regex"));
static CN_PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^1[3-9]\d{9}$").expect("Invalid regex"));
static INTL_PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4,15}$").expect("Invalid regex"));
static CN_POSTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{6}$").expect("Invalid regex"));
static INTL_POSTCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 -]{1,9}$").expect("Invalid regex"));
static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").expect("Invalid regex")
});

/// A validated form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Receiver,
    CountryCode,
    Phone,
    Address,
    Postcode,
    #[serde(rename = "pool_id")]
    Pool,
    Quantity,
    #[serde(rename = "mac_addr")]
    MacAddress,
    Email,
    WalletAddress,
    TxHash,
}

impl Field {
    /// Form input name for this field.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::CountryCode => "country_code",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::Postcode => "postcode",
            Self::Pool => "pool_id",
            Self::Quantity => "quantity",
            Self::MacAddress => "mac_addr",
            Self::Email => "email",
            Self::WalletAddress => "wallet_address",
            Self::TxHash => "tx_hash",
        }
    }
}

/// Validation failures keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<Field, String>);

impl FieldErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`. The first message for a field wins.
    pub fn add(&mut self, field: Field, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    /// Look up a message by form input name (for templates).
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(field, _)| field.name() == name)
            .map(|(_, msg)| msg.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(value)` when no errors were recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` if any field failed.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, msg) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {msg}", field.name())?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

/// Trim `value` and record a "required" error when nothing is left.
pub fn required(value: &str, field: Field, errors: &mut FieldErrors) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, "This field is required");
    }
    trimmed.to_owned()
}

#[must_use]
pub fn is_country_code(value: &str) -> bool {
    COUNTRY_CODE_RE.is_match(value)
}

/// Phone number check, stricter for mainland China numbers.
#[must_use]
pub fn is_phone(country_code: &str, phone: &str) -> bool {
    if country_code == DEFAULT_COUNTRY_CODE {
        CN_PHONE_RE.is_match(phone)
    } else {
        INTL_PHONE_RE.is_match(phone)
    }
}

#[must_use]
pub fn is_postcode(country_code: &str, postcode: &str) -> bool {
    if country_code == DEFAULT_COUNTRY_CODE {
        CN_POSTCODE_RE.is_match(postcode)
    } else {
        INTL_POSTCODE_RE.is_match(postcode)
    }
}

#[must_use]
pub fn is_mac_address(value: &str) -> bool {
    MAC_RE.is_match(value)
}

/// Validate a MAC address typed into the add-machine form.
///
/// # Errors
///
/// Returns the field errors when the value is empty or malformed.
pub fn mac_address(value: &str) -> Result<String, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mac = required(value, Field::MacAddress, &mut errors);
    if !mac.is_empty() && !is_mac_address(&mac) {
        errors.add(
            Field::MacAddress,
            "Enter a MAC address like 00:1A:2B:3C:4D:5E",
        );
    }
    errors.into_result(mac)
}
