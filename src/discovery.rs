//! Discovery document fetching with a per-issuer TTL cache.

// crates.io
use oauth2::http::{Method, Request, StatusCode, header::ACCEPT};
// self
use crate::{
	_prelude::*,
	auth::whole_seconds,
	error::{ConfigError, ProtocolError},
	http::OidcHttpClient,
	oauth::{self, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::StorageBackend,
};

/// Default discovery cache lifetime.
pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::hours(1);

const CACHE_PREFIX: &str = "oidc.server:";
const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Issuer metadata consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfiguration {
	/// Issuer identifier.
	pub issuer: String,
	/// Authorization endpoint.
	pub authorization_endpoint: Url,
	/// Token endpoint.
	pub token_endpoint: Url,
	/// User-info endpoint.
	#[serde(default)]
	pub userinfo_endpoint: Option<Url>,
	/// Revocation endpoint.
	#[serde(default)]
	pub revocation_endpoint: Option<Url>,
	/// When the document was fetched.
	#[serde(with = "time::serde::timestamp")]
	pub cached_at: OffsetDateTime,
}
impl ServerConfiguration {
	/// `true` while `now` is within `ttl` of the fetch instant.
	pub fn is_fresh_at(&self, ttl: Duration, now: OffsetDateTime) -> bool {
		self.cached_at.checked_add(ttl).is_none_or(|expiry| now < expiry)
	}

	/// Revocation endpoint, or a configuration error when the issuer does not advertise one.
	pub fn require_revocation_endpoint(&self) -> Result<&Url> {
		self.revocation_endpoint
			.as_ref()
			.ok_or_else(|| ConfigError::MissingEndpoint { endpoint: "revocation" }.into())
	}

	#[cfg(test)]
	pub(crate) fn for_testing(issuer: &str) -> Self {
		let endpoint = |path: &str| {
			Url::parse(&format!("{issuer}{path}")).expect("Endpoint fixture should parse.")
		};

		Self {
			issuer: issuer.to_owned(),
			authorization_endpoint: endpoint("/protocol/openid-connect/auth"),
			token_endpoint: endpoint("/protocol/openid-connect/token"),
			userinfo_endpoint: Some(endpoint("/protocol/openid-connect/userinfo")),
			revocation_endpoint: Some(endpoint("/protocol/openid-connect/revoke")),
			cached_at: whole_seconds(OffsetDateTime::now_utc()),
		}
	}
}

#[derive(Deserialize)]
struct DiscoveryDocument {
	issuer: String,
	authorization_endpoint: Url,
	token_endpoint: Url,
	#[serde(default)]
	userinfo_endpoint: Option<Url>,
	#[serde(default)]
	revocation_endpoint: Option<Url>,
}

/// Fetches discovery documents and caches them in a storage medium.
pub struct ServerConfigCache<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http: Arc<C>,
	mapper: Arc<M>,
	timeout: Duration,
}
impl<C, M> ServerConfigCache<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a cache using the default request timeout.
	pub fn new(http: impl Into<Arc<C>>, mapper: impl Into<Arc<M>>) -> Self {
		Self { http: http.into(), mapper: mapper.into(), timeout: oauth::DEFAULT_TIMEOUT }
	}

	/// Overrides the request timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Returns the cached document for `issuer` or fetches a fresh one.
	///
	/// A non-200 answer yields `Ok(None)`. Transport faults propagate without retry.
	pub async fn fetch_configuration(
		&self,
		issuer: &Url,
		ttl: Duration,
		storage: &dyn StorageBackend,
	) -> Result<Option<ServerConfiguration>> {
		self.fetch_configuration_at(issuer, ttl, storage, OffsetDateTime::now_utc()).await
	}

	/// [`ServerConfigCache::fetch_configuration`] against an explicit instant.
	pub async fn fetch_configuration_at(
		&self,
		issuer: &Url,
		ttl: Duration,
		storage: &dyn StorageBackend,
		now: OffsetDateTime,
	) -> Result<Option<ServerConfiguration>> {
		let issuer_id = issuer.as_str().trim_end_matches('/');
		let key = cache_key(issuer_id);

		if let Some(cached) = read_cached(storage, &key)
			&& cached.is_fresh_at(ttl, now)
		{
			return Ok(Some(cached));
		}

		const KIND: FlowKind = FlowKind::Discovery;

		let span = FlowSpan::new(KIND, "fetch_configuration");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.fetch_fresh(issuer_id, now)).await;

		obs::record_result(KIND, &result);

		let fetched = result?;

		if let Some(configuration) = &fetched {
			let raw = serde_json::to_string(configuration).map_err(|e| {
				crate::store::StoreError::Serialization {
					message: format!("Failed to serialize discovery document: {e}"),
				}
			})?;

			storage.set_item(&key, &raw)?;
		}

		Ok(fetched)
	}

	async fn fetch_fresh(
		&self,
		issuer_id: &str,
		now: OffsetDateTime,
	) -> Result<Option<ServerConfiguration>> {
		let endpoint = Url::parse(&format!("{issuer_id}{WELL_KNOWN_PATH}"))
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "discovery", source })?;
		let request = Request::builder()
			.method(Method::GET)
			.uri(endpoint.as_str())
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let response = oauth::send_with_timeout(
			self.http.as_ref(),
			self.mapper.as_ref(),
			&endpoint,
			request,
			self.timeout,
		)
		.await?;

		if response.status() != StatusCode::OK {
			return Ok(None);
		}

		let mut deserializer = serde_json::Deserializer::from_slice(response.body());
		let document: DiscoveryDocument = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ProtocolError::DiscoveryParse {
				issuer: issuer_id.to_owned(),
				source,
			})?;

		Ok(Some(ServerConfiguration {
			issuer: document.issuer,
			authorization_endpoint: document.authorization_endpoint,
			token_endpoint: document.token_endpoint,
			userinfo_endpoint: document.userinfo_endpoint,
			revocation_endpoint: document.revocation_endpoint,
			cached_at: whole_seconds(now),
		}))
	}
}
impl<C, M> Clone for ServerConfigCache<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { http: self.http.clone(), mapper: self.mapper.clone(), timeout: self.timeout }
	}
}

/// Storage key for an issuer's cached document.
pub fn cache_key(issuer: &str) -> String {
	format!("{CACHE_PREFIX}{}", issuer.trim_end_matches('/'))
}

// Corrupt cache entries are refetched.
fn read_cached(storage: &dyn StorageBackend, key: &str) -> Option<ServerConfiguration> {
	let raw = storage.get_item(key).ok()??;

	serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn freshness_respects_ttl() {
		let configuration = ServerConfiguration::for_testing("https://idp.example.com");
		let fetched = configuration.cached_at;

		assert!(configuration.is_fresh_at(DEFAULT_DISCOVERY_TTL, fetched + Duration::minutes(59)));
		assert!(!configuration.is_fresh_at(DEFAULT_DISCOVERY_TTL, fetched + Duration::hours(1)));
	}

	#[test]
	fn cached_documents_survive_storage_unchanged() {
		let configuration = ServerConfiguration::for_testing("https://idp.example.com");
		let raw = serde_json::to_string(&configuration).expect("Document should serialize.");
		let restored: ServerConfiguration =
			serde_json::from_str(&raw).expect("Document should deserialize.");

		assert_eq!(restored, configuration);
		assert!(configuration.is_fresh_at(Duration::MAX, configuration.cached_at));
	}

	#[test]
	fn cache_keys_ignore_trailing_slashes() {
		assert_eq!(cache_key("https://idp.example.com/"), "oidc.server:https://idp.example.com");
	}

	#[test]
	fn missing_revocation_endpoint_is_a_config_error() {
		let mut configuration = ServerConfiguration::for_testing("https://idp.example.com");

		configuration.revocation_endpoint = None;

		assert!(matches!(
			configuration.require_revocation_endpoint(),
			Err(Error::Config(ConfigError::MissingEndpoint { endpoint: "revocation" }))
		));
	}
}
