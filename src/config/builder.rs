// self
use crate::{
	_prelude::*,
	auth::{ClientId, ConfigurationName, ScopeSet},
	config::{NoncePolicy, OidcClientConfig, QueryMode, StorageKind, TokenRenewMode, defaults},
};

/// Errors raised while constructing or validating client configurations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ConfigBuildError {
	/// Serialized configuration could not be parsed.
	#[error("Configuration could not be parsed: {message}.")]
	Parse {
		/// Path-qualified parser message.
		message: String,
	},
	/// The authority must use HTTPS unless it points at a loopback host.
	#[error("The authority must use HTTPS: {url}.")]
	InsecureAuthority {
		/// Authority that failed validation.
		url: String,
	},
	/// Redirect URIs cannot carry fragments.
	#[error("The {field} must not contain a fragment: {url}.")]
	RedirectWithFragment {
		/// Which redirect failed validation.
		field: &'static str,
		/// Redirect URL that failed validation.
		url: String,
	},
	/// Timeouts must be strictly positive.
	#[error("The {field} must be positive.")]
	NonPositiveTimeout {
		/// Which timeout failed validation.
		field: &'static str,
	},
	/// A negative renewal margin would schedule renewals after expiry.
	#[error("The renewal margin cannot be negative.")]
	NegativeRenewalMargin,
}

/// Builder for [`OidcClientConfig`] values.
#[derive(Debug)]
pub struct OidcClientConfigBuilder {
	config: OidcClientConfig,
}
impl OidcClientConfigBuilder {
	/// Creates a builder with defaults for every optional field.
	pub fn new(client_id: ClientId, authority: Url, redirect_uri: Url) -> Self {
		Self {
			config: OidcClientConfig {
				configuration_name: ConfigurationName::default(),
				client_id,
				authority,
				redirect_uri,
				silent_redirect_uri: None,
				scope: ScopeSet::openid(),
				renewal_margin: defaults::renewal_margin(),
				token_renew_mode: TokenRenewMode::default(),
				nonce_policy: NoncePolicy::default(),
				storage: StorageKind::default(),
				demonstrating_proof_of_possession: false,
				hide_access_token: true,
				discovery_ttl: defaults::discovery_ttl(),
				request_timeout: defaults::request_timeout(),
				silent_renew_timeout: defaults::silent_renew_timeout(),
				query_mode: QueryMode::default(),
				extras: BTreeMap::new(),
				token_request_extras: BTreeMap::new(),
			},
		}
	}

	/// Overrides the configuration name.
	pub fn configuration_name(mut self, name: ConfigurationName) -> Self {
		self.config.configuration_name = name;

		self
	}

	/// Sets the silent renewal callback URL.
	pub fn silent_redirect_uri(mut self, url: Url) -> Self {
		self.config.silent_redirect_uri = Some(url);

		self
	}

	/// Overrides the requested scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.config.scope = scope;

		self
	}

	/// Overrides the proactive renewal margin.
	pub fn renewal_margin(mut self, margin: Duration) -> Self {
		self.config.renewal_margin = margin;

		self
	}

	/// Overrides which expiry drives renewal.
	pub fn token_renew_mode(mut self, mode: TokenRenewMode) -> Self {
		self.config.token_renew_mode = mode;

		self
	}

	/// Overrides nonce enforcement.
	pub fn nonce_policy(mut self, policy: NoncePolicy) -> Self {
		self.config.nonce_policy = policy;

		self
	}

	/// Overrides the storage medium.
	pub fn storage(mut self, storage: StorageKind) -> Self {
		self.config.storage = storage;

		self
	}

	/// Enables or disables proof-of-possession credentials.
	pub fn demonstrating_proof_of_possession(mut self, enabled: bool) -> Self {
		self.config.demonstrating_proof_of_possession = enabled;

		self
	}

	/// Controls whether the relay hides access tokens.
	pub fn hide_access_token(mut self, hide: bool) -> Self {
		self.config.hide_access_token = hide;

		self
	}

	/// Overrides the discovery cache lifetime.
	pub fn discovery_ttl(mut self, ttl: Duration) -> Self {
		self.config.discovery_ttl = ttl;

		self
	}

	/// Overrides the per-attempt request timeout.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;

		self
	}

	/// Overrides the silent renewal bound.
	pub fn silent_renew_timeout(mut self, timeout: Duration) -> Self {
		self.config.silent_renew_timeout = timeout;

		self
	}

	/// Overrides the callback parsing mode.
	pub fn query_mode(mut self, mode: QueryMode) -> Self {
		self.config.query_mode = mode;

		self
	}

	/// Adds an extra authorization request parameter.
	pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.extras.insert(key.into(), value.into());

		self
	}

	/// Adds an extra token request parameter.
	pub fn token_request_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.token_request_extras.insert(key.into(), value.into());

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<OidcClientConfig, ConfigBuildError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

impl OidcClientConfig {
	/// Validates invariants for the configuration.
	pub(super) fn validate(&self) -> Result<(), ConfigBuildError> {
		validate_authority(&self.authority)?;
		validate_redirect("redirect_uri", &self.redirect_uri)?;

		if let Some(silent) = self.silent_redirect_uri.as_ref() {
			validate_redirect("silent_redirect_uri", silent)?;
		}
		if self.renewal_margin.is_negative() {
			return Err(ConfigBuildError::NegativeRenewalMargin);
		}

		validate_timeout("request_timeout", self.request_timeout)?;
		validate_timeout("silent_renew_timeout", self.silent_renew_timeout)?;
		validate_timeout("discovery_ttl", self.discovery_ttl)?;

		Ok(())
	}
}

fn validate_authority(url: &Url) -> Result<(), ConfigBuildError> {
	let loopback = match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	};

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		Ok(())
	} else {
		Err(ConfigBuildError::InsecureAuthority { url: url.to_string() })
	}
}

fn validate_redirect(field: &'static str, url: &Url) -> Result<(), ConfigBuildError> {
	if url.fragment().is_some() {
		Err(ConfigBuildError::RedirectWithFragment { field, url: url.to_string() })
	} else {
		Ok(())
	}
}

fn validate_timeout(field: &'static str, value: Duration) -> Result<(), ConfigBuildError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigBuildError::NonPositiveTimeout { field }) }
}
