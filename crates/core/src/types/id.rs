//! Newtype IDs for type-safe entity references.
//!
//! The backend hands out identifiers as JSON numbers for some entities and as
//! strings for others (and occasionally both for the same entity), so every
//! ID is stored as its canonical string form and accepts either on input.

/// Wire form accepted by ID deserialization.
#[doc(hidden)]
#[derive(serde::Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
        }
    }
}

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize` as a string, `Deserialize` from a string or an integer
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`
/// - `new()`, `as_str()`, `Display`, `From<&str>`, `From<String>`
///
/// # Example
///
/// ```rust
/// # use epochmine_core::define_id;
/// define_id!(WidgetId);
///
/// let id: WidgetId = serde_json::from_str("42").unwrap();
/// assert_eq!(id.as_str(), "42");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, ::serde::Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::core::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                <$crate::types::id::RawId as ::serde::Deserialize>::deserialize(deserializer)
                    .map(|raw| Self(raw.into()))
            }
        }

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(UserId);
define_id!(MinerId);
define_id!(PoolId);
define_id!(OrderId);
define_id!(NodeId);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_number_or_string() {
        let a: OrderId = serde_json::from_str("17").unwrap();
        let b: OrderId = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "17");
    }

    #[test]
    fn test_serializes_as_string() {
        let id = MinerId::new("m-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m-1\"");
    }

    #[test]
    fn test_display() {
        assert_eq!(PoolId::from("p9").to_string(), "p9");
    }
}
