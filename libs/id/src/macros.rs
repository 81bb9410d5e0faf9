//! Macros for defining typed reference types.

/// Macro to define a typed, opaque reference minted by the service under test.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` to validate a string
/// - `generate()` to mint a UUID-backed reference
/// - `as_str()` for URL building
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations that validate on input
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_ref!(TenantId, "tenant");
///
/// let tenant: TenantId = "8d3c1a5e-2f4b-4c3e-9a41-0d8b6f1c2e77".parse()?;
/// let url = format!("{base}/{tenant}/instances");
/// ```
#[macro_export]
macro_rules! define_ref {
    ($name:ident, $kind:literal) => {
        /// A typed reference for this resource type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable resource kind.
            pub const KIND: &'static str = $kind;

            /// Parses a reference from a string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if let Some(character) = s
                    .chars()
                    .find(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace())
                {
                    return Err($crate::IdError::InvalidCharacter {
                        kind: Self::KIND,
                        character,
                        actual: s.to_string(),
                    });
                }

                Ok(Self(s.to_string()))
            }

            /// Mints a fresh UUID-backed reference, as a service would.
            #[must_use]
            pub fn generate() -> Self {
                Self($crate::Uuid::new_v4().to_string())
            }

            /// Returns the reference as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the reference, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
