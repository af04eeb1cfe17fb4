//! Token-hiding network relay.
//!
//! The relay runs as its own task with no memory shared with the page-side engine. Pages talk
//! to it through a [`RelayHandle`]: control messages (`init`, `clear`, `loadItems`, item
//! replacement) and fetches both cross an `mpsc` channel with a `oneshot` reply. While the
//! relay holds a token set it attaches the real credentials to requests bound for trusted
//! origins, restores real refresh tokens into token-endpoint requests, and replaces real
//! tokens in token-endpoint responses with [placeholders](access_token_placeholder), so page
//! code only ever observes placeholder strings.

pub mod intercept;
pub mod message;
pub mod session;
pub mod worker;

pub use intercept::*;
pub use message::*;
pub use session::*;
pub use worker::*;

/// Relay protocol version announced by `init` messages.
pub const RELAY_VERSION: &str = "1.0.0";

const ACCESS_TOKEN_PLACEHOLDER: &str = "ACCESS_TOKEN_SECURED_BY_OIDC_SERVICE_WORKER";
const REFRESH_TOKEN_PLACEHOLDER: &str = "REFRESH_TOKEN_SECURED_BY_OIDC_SERVICE_WORKER";

/// Placeholder that stands in for the access token of `configuration_name`.
pub fn access_token_placeholder(configuration_name: &str) -> String {
	format!("{ACCESS_TOKEN_PLACEHOLDER}_{configuration_name}")
}

/// Placeholder that stands in for the refresh token of `configuration_name`.
pub fn refresh_token_placeholder(configuration_name: &str) -> String {
	format!("{REFRESH_TOKEN_PLACEHOLDER}_{configuration_name}")
}

/// Returns `true` for any relay placeholder string.
pub fn is_placeholder(value: &str) -> bool {
	value.starts_with(ACCESS_TOKEN_PLACEHOLDER) || value.starts_with(REFRESH_TOKEN_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn placeholders_are_scoped_by_configuration() {
		assert_eq!(
			access_token_placeholder("default"),
			"ACCESS_TOKEN_SECURED_BY_OIDC_SERVICE_WORKER_default"
		);
		assert_eq!(
			refresh_token_placeholder("admin"),
			"REFRESH_TOKEN_SECURED_BY_OIDC_SERVICE_WORKER_admin"
		);
		assert!(is_placeholder(&refresh_token_placeholder("admin")));
		assert!(!is_placeholder("eyJhbGciOiJSUzI1NiJ9"));
	}
}
