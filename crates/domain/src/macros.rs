//! Macro for implementing stable string codes on taxonomy enums
//!
//! Error codes cross process and network boundaries, so their string form is
//! part of the public contract. This macro generates the canonical string
//! mapping once and derives `as_str`, `Display` and `FromStr` from it.
//!
//! # Example
//!
//! ```rust
//! use authflow_domain::impl_stable_code_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Outcome {
//!     Accepted,
//!     RateLimited,
//! }
//!
//! impl_stable_code_conversions!(Outcome {
//!     Accepted => "accepted",
//!     RateLimited => "rate_limited",
//! });
//!
//! assert_eq!(Outcome::RateLimited.as_str(), "rate_limited");
//! assert_eq!("Rate-Limited".parse::<Outcome>().unwrap(), Outcome::RateLimited);
//! ```

/// Implements `as_str`, `Display` and `FromStr` for code enums
///
/// # Features
///
/// - Case-insensitive parsing
/// - `-`, `.` and spaces are treated as `_` when parsing (`"not-found"`
///   parses like `"not_found"`)
/// - Descriptive error messages with enum name
#[macro_export]
macro_rules! impl_stable_code_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical snake_case identifier for this code.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let normalized: String = s
                    .trim()
                    .chars()
                    .map(|c| if matches!(c, '-' | '.' | ' ') { '_' } else { c.to_ascii_lowercase() })
                    .collect();
                match normalized.as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
