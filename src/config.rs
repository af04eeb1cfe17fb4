//! Client configuration consumed read-only by every engine component.
//!
//! [`OidcClientConfig`] is deserializable so hosts can keep it in their own configuration
//! files, but the supported way to assemble one in code is [`OidcClientConfig::builder`], which
//! applies defaults and validates the result.

/// Builder API for assembling client configurations.
pub mod builder;

pub use builder::*;

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ConfigurationName, ScopeSet},
	store::{FileStorage, MemoryStorage, StorageBackend, StoreError},
};

/// Selects which expiry instant drives proactive renewal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRenewMode {
	/// Renew when either the access token or the id token is about to expire.
	#[default]
	AccessTokenOrIdTokenInvalid,
	/// Renew when the access token is about to expire.
	AccessTokenInvalid,
	/// Renew when the id token is about to expire.
	IdTokenInvalid,
}

/// How the login callback treats the nonce it issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoncePolicy {
	/// A returned id token must carry the nonce issued with the authorization request.
	#[default]
	Required,
	/// The nonce is compared only when the id token carries one.
	IfPresent,
}

/// Where callback parameters are read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
	/// Parameters live in the URL fragment (`#code=..&state=..`).
	Hash,
	/// Parameters live in the query string.
	#[default]
	NoHash,
}

/// Storage medium backing the token store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
	/// Process-local map; lost when the client is dropped.
	#[default]
	Memory,
	/// JSON snapshot file rewritten after every mutation.
	File(PathBuf),
}
impl StorageKind {
	/// Opens the backend described by this selector.
	pub fn open(&self) -> Result<Arc<dyn StorageBackend>, StoreError> {
		match self {
			Self::Memory => Ok(Arc::new(MemoryStorage::default())),
			Self::File(path) => Ok(Arc::new(FileStorage::open(path.clone())?)),
		}
	}
}

/// Validated client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcClientConfig {
	/// Scoping key for storage entries and relay placeholders.
	#[serde(default)]
	pub configuration_name: ConfigurationName,
	/// OAuth client identifier.
	pub client_id: ClientId,
	/// Issuer URL; discovery is fetched below it.
	pub authority: Url,
	/// Login callback URL.
	pub redirect_uri: Url,
	/// Callback URL used by silent renewal, when supported by the host.
	#[serde(default)]
	pub silent_redirect_uri: Option<Url>,
	/// Requested scopes (`openid` is always added).
	#[serde(default = "ScopeSet::openid")]
	pub scope: ScopeSet,
	/// Remaining lifetime at or below which a session is renewed proactively.
	#[serde(default = "defaults::renewal_margin", with = "seconds")]
	pub renewal_margin: Duration,
	/// Which expiry drives renewal.
	#[serde(default)]
	pub token_renew_mode: TokenRenewMode,
	/// Nonce enforcement during the login callback.
	#[serde(default)]
	pub nonce_policy: NoncePolicy,
	/// Storage medium for tokens and pending authorization state.
	#[serde(default)]
	pub storage: StorageKind,
	/// Sends `PoP` credentials with a `DPoP` proof instead of bearer credentials.
	#[serde(default)]
	pub demonstrating_proof_of_possession: bool,
	/// Whether the relay also hides access tokens (refresh tokens are always hidden).
	#[serde(default = "defaults::enabled")]
	pub hide_access_token: bool,
	/// Discovery cache lifetime.
	#[serde(default = "defaults::discovery_ttl", with = "seconds")]
	pub discovery_ttl: Duration,
	/// Per-attempt timeout for token and discovery calls.
	#[serde(default = "defaults::request_timeout", with = "seconds")]
	pub request_timeout: Duration,
	/// Bound on one silent renewal round trip.
	#[serde(default = "defaults::silent_renew_timeout", with = "seconds")]
	pub silent_renew_timeout: Duration,
	/// Where callback parameters are read from.
	#[serde(default)]
	pub query_mode: QueryMode,
	/// Extra authorization request parameters.
	#[serde(default)]
	pub extras: BTreeMap<String, String>,
	/// Extra token request parameters.
	#[serde(default)]
	pub token_request_extras: BTreeMap<String, String>,
}
impl OidcClientConfig {
	/// Creates a builder seeded with the three required values.
	pub fn builder(
		client_id: ClientId,
		authority: Url,
		redirect_uri: Url,
	) -> OidcClientConfigBuilder {
		OidcClientConfigBuilder::new(client_id, authority, redirect_uri)
	}

	/// Deserializes a configuration from JSON and validates it.
	pub fn from_json(json: &str) -> Result<Self, ConfigBuildError> {
		let mut deserializer = serde_json::Deserializer::from_str(json);
		let config: Self = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|e| ConfigBuildError::Parse { message: e.to_string() })?;

		config.validate()?;

		Ok(config)
	}

	/// Scope string sent with authorization requests.
	pub fn requested_scope(&self) -> String {
		self.scope.with_openid().normalized()
	}
}

mod defaults {
	// self
	use crate::_prelude::*;

	pub(super) fn renewal_margin() -> Duration {
		Duration::seconds(120)
	}

	pub(super) fn discovery_ttl() -> Duration {
		Duration::hours(1)
	}

	pub(super) fn request_timeout() -> Duration {
		Duration::seconds(10)
	}

	pub(super) fn silent_renew_timeout() -> Duration {
		Duration::seconds(12)
	}

	pub(super) fn enabled() -> bool {
		true
	}
}

mod seconds {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn json_configuration_applies_defaults() {
		let config = OidcClientConfig::from_json(
			r#"{
				"client_id": "spa",
				"authority": "https://idp.example.com/realms/demo",
				"redirect_uri": "https://app.example.com/callback",
				"renewal_margin": 70
			}"#,
		)
		.expect("Minimal configuration should parse.");

		assert_eq!(config.configuration_name.as_ref(), ConfigurationName::DEFAULT);
		assert_eq!(config.renewal_margin, Duration::seconds(70));
		assert_eq!(config.discovery_ttl, Duration::hours(1));
		assert_eq!(config.request_timeout, Duration::seconds(10));
		assert!(config.hide_access_token);
		assert_eq!(config.token_renew_mode, TokenRenewMode::AccessTokenOrIdTokenInvalid);
		assert_eq!(config.nonce_policy, NoncePolicy::Required);
		assert_eq!(config.query_mode, QueryMode::NoHash);
		assert_eq!(config.requested_scope(), "openid");
	}

	#[test]
	fn json_configuration_is_validated() {
		let err = OidcClientConfig::from_json(
			r#"{
				"client_id": "spa",
				"authority": "http://idp.example.com",
				"redirect_uri": "https://app.example.com/callback"
			}"#,
		)
		.expect_err("Plain HTTP authority should be rejected.");

		assert!(matches!(err, ConfigBuildError::InsecureAuthority { .. }));

		let err = OidcClientConfig::from_json(r#"{"client_id": "spa"}"#)
			.expect_err("Missing authority should be reported.");

		assert!(matches!(err, ConfigBuildError::Parse { .. }));
	}

	#[test]
	fn storage_kind_opens_memory_backend() {
		let backend = StorageKind::Memory.open().expect("Memory backend should open.");

		backend.set_item("k", "v").expect("Memory backend should accept writes.");

		assert_eq!(backend.get_item("k").expect("Read should succeed."), Some("v".into()));
	}
}
