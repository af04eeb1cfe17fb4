//! Strongly typed identifiers for client registrations and configuration scopes.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, configuration).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, configuration).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, configuration).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { ClientId, "OAuth client identifier registered with the issuer.", "Client" }
def_id! { ConfigurationName, "Name scoping storage keys and relay placeholders to one client configuration.", "Configuration" }

impl ConfigurationName {
	/// Name used when a client does not declare one.
	pub const DEFAULT: &'static str = "default";
}
impl Default for ConfigurationName {
	fn default() -> Self {
		Self(Self::DEFAULT.to_owned())
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(ClientId::new(" spa-client").is_err(), "Leading whitespace must be rejected.");
		assert!(ClientId::new("spa-client ").is_err(), "Trailing whitespace must be rejected.");
		assert!(ConfigurationName::new("").is_err());

		let client = ClientId::new("spa-client").expect("Client fixture should be valid.");

		assert_eq!(client.as_ref(), "spa-client");
		assert_eq!(format!("{client:?}"), "Client(spa-client)");
	}

	#[test]
	fn configuration_name_defaults_and_deserializes() {
		assert_eq!(ConfigurationName::default().as_ref(), "default");

		let name: ConfigurationName =
			serde_json::from_str("\"secondary\"").expect("Name should deserialize.");

		assert_eq!(&*name, "secondary");
		assert!(serde_json::from_str::<ConfigurationName>("\"with space\"").is_err());
	}

	#[test]
	fn length_limit_is_enforced() {
		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		ClientId::new(&exact).expect("Exact length should succeed.");

		assert!(ClientId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<ConfigurationName, u8> = HashMap::from_iter([(
			ConfigurationName::new("primary").expect("Name used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("primary"), Some(&7));
	}
}
