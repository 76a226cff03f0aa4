//! Shipping address form and its validated snapshot.

use serde::{Deserialize, Serialize};

use crate::validate::{self, DEFAULT_COUNTRY_CODE, Field, FieldErrors};

/// Raw shipping form input, exactly as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingForm {
    pub receiver: String,
    pub country_code: String,
    pub phone: String,
    pub address: String,
    pub postcode: String,
}

/// A validated shipping address.
///
/// Embedded into an order when it is created; the backend never lets it
/// change afterward, so the storefront only ever builds one from a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub receiver: String,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    pub phone: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_owned()
}

impl ShippingForm {
    /// A blank form with the default country code filled in.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            country_code: default_country_code(),
            ..Self::default()
        }
    }

    /// Validate every field and build the address snapshot.
    ///
    /// All problems are reported together; nothing short-circuits.
    ///
    /// # Errors
    ///
    /// Returns [`FieldErrors`] with one message per failing field.
    pub fn validate(&self) -> Result<ShippingAddress, FieldErrors> {
        let mut errors = FieldErrors::new();

        let receiver = validate::required(&self.receiver, Field::Receiver, &mut errors);
        let address = validate::required(&self.address, Field::Address, &mut errors);

        let country_code = match self.country_code.trim() {
            "" => default_country_code(),
            code => code.to_owned(),
        };
        if !validate::is_country_code(&country_code) {
            errors.add(Field::CountryCode, "Enter a country code like +86");
        }

        let phone = validate::required(&self.phone, Field::Phone, &mut errors);
        if !phone.is_empty() && !validate::is_phone(&country_code, &phone) {
            errors.add(Field::Phone, "Enter a valid phone number");
        }

        let postcode = match self.postcode.trim() {
            "" => None,
            code => {
                if !validate::is_postcode(&country_code, code) {
                    errors.add(Field::Postcode, "Enter a valid postcode");
                }
                Some(code.to_owned())
            }
        };

        errors.into_result(ShippingAddress {
            receiver,
            country_code,
            phone,
            address,
            postcode,
        })
    }
}

impl ShippingAddress {
    /// Phone number with its country code, for display.
    #[must_use]
    pub fn full_phone(&self) -> String {
        format!("{} {}", self.country_code, self.phone)
    }
}

impl From<&ShippingAddress> for ShippingForm {
    fn from(addr: &ShippingAddress) -> Self {
        Self {
            receiver: addr.receiver.clone(),
            country_code: addr.country_code.clone(),
            phone: addr.phone.clone(),
            address: addr.address.clone(),
            postcode: addr.postcode.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn form() -> ShippingForm {
        ShippingForm {
            receiver: " Li Wei ".into(),
            country_code: "+86".into(),
            phone: "13812345678".into(),
            address: "1 Century Ave, Shanghai".into(),
            postcode: "200120".into(),
        }
    }

    #[test]
    fn test_valid_form() {
        let addr = form().validate().unwrap();
        assert_eq!(addr.receiver, "Li Wei");
        assert_eq!(addr.postcode.as_deref(), Some("200120"));
        assert_eq!(addr.full_phone(), "+86 13812345678");
    }

    #[test]
    fn test_postcode_is_optional() {
        let addr = ShippingForm {
            postcode: "   ".into(),
            ..form()
        }
        .validate()
        .unwrap();
        assert_eq!(addr.postcode, None);
        assert!(!serde_json::to_string(&addr).unwrap().contains("postcode"));
    }

    #[test]
    fn test_blank_country_code_defaults() {
        let addr = ShippingForm {
            country_code: String::new(),
            ..form()
        }
        .validate()
        .unwrap();
        assert_eq!(addr.country_code, "+86");
    }

    #[test]
    fn test_reports_all_errors() {
        let errors = ShippingForm {
            receiver: "  ".into(),
            phone: "123".into(),
            address: String::new(),
            postcode: "12".into(),
            ..form()
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.get(Field::Receiver).is_some());
        assert!(errors.get(Field::Phone).is_some());
        assert!(errors.get(Field::Address).is_some());
        assert!(errors.get(Field::Postcode).is_some());
    }

    #[test]
    fn test_international_address() {
        let addr = ShippingForm {
            country_code: "+1".into(),
            phone: "4155550123".into(),
            postcode: "94105".into(),
            ..form()
        }
        .validate()
        .unwrap();
        assert_eq!(addr.country_code, "+1");
    }

    #[test]
    fn test_bad_country_code() {
        let errors = ShippingForm {
            country_code: "86".into(),
            ..form()
        }
        .validate()
        .unwrap_err();
        assert!(errors.get(Field::CountryCode).is_some());
    }
}
