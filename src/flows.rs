//! Page-side orchestration: login redirects, callback processing, renewal, and logout.
//!
//! [`OidcClient`] owns the transport, the token store, the discovery cache, and the strategy
//! references so each flow module can focus on its own step of the session state machine.

pub mod authorize;
pub mod callback;
pub mod renewal;
mod session;
pub mod strategy;

pub use authorize::*;
pub use callback::*;
pub use renewal::*;
pub use strategy::*;

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	config::OidcClientConfig,
	discovery::{ServerConfigCache, ServerConfiguration},
	error::ProtocolError,
	http::{DpopProofGenerator, OidcHttpClient},
	oauth::{TokenRequestClient, TransportErrorMapper},
	pkce::PkceGenerator,
	store::{StorageBackend, TokenStore},
	validation,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport stack.
pub type ReqwestOidcClient = OidcClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

type PendingRenewal = Arc<async_lock::OnceCell<Result<TokenSet, crate::error::RenewalError>>>;

/// Session state machine positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStatus {
	/// No token set is held.
	Unauthenticated,
	/// A login redirect was issued and its callback is pending.
	Authorizing,
	/// A token set is held.
	Authenticated,
	/// A renewal is in flight; the previous token set stays usable.
	Renewing,
	/// The renewal credential was rejected; full re-authentication is required.
	SessionLost,
}
impl SessionStatus {
	/// Returns a stable label suitable for logs and errors.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unauthenticated => "unauthenticated",
			Self::Authorizing => "authorizing",
			Self::Authenticated => "authenticated",
			Self::Renewing => "renewing",
			Self::SessionLost => "session_lost",
		}
	}
}
impl Display for SessionStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Drives the authorization-code + PKCE session of one client configuration.
///
/// Every outbound call goes through the `C` transport, so the same client can talk to the
/// issuer directly or through a [`RelayHandle`](crate::relay::RelayHandle).
pub struct OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Shared counters for renewal attempts and network exchanges.
	pub renewal_metrics: Arc<RenewalMetrics>,
	config: OidcClientConfig,
	http: Arc<C>,
	mapper: Arc<M>,
	tokens: TokenStore,
	discovery_storage: Arc<dyn StorageBackend>,
	discovery: ServerConfigCache<C, M>,
	token_client: TokenRequestClient<C, M>,
	strategy: Arc<dyn ProviderStrategy>,
	pkce: PkceGenerator,
	silent_renewer: Option<Arc<dyn SilentRenewer>>,
	dpop: Option<Arc<dyn DpopProofGenerator>>,
	status: watch::Sender<SessionStatus>,
	pending_renewal: Mutex<Option<PendingRenewal>>,
}
impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper pair.
	///
	/// `token_storage` holds the token set and pending authorization state; `discovery_storage`
	/// holds cached discovery documents. They may be the same backend.
	pub fn with_http_client(
		config: OidcClientConfig,
		token_storage: Arc<dyn StorageBackend>,
		discovery_storage: Arc<dyn StorageBackend>,
		http: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		let http = http.into();
		let mapper = mapper.into();
		let tokens = TokenStore::new(token_storage, &config.configuration_name);
		let initial = match tokens.tokens() {
			Ok(Some(_)) => SessionStatus::Authenticated,
			_ => SessionStatus::Unauthenticated,
		};
		let discovery = ServerConfigCache::new(http.clone(), mapper.clone())
			.with_timeout(config.request_timeout);
		let token_client = TokenRequestClient::new(http.clone(), mapper.clone())
			.with_timeout(config.request_timeout);

		Self {
			renewal_metrics: Default::default(),
			config,
			http,
			mapper,
			tokens,
			discovery_storage,
			discovery,
			token_client,
			strategy: Arc::new(DefaultProviderStrategy),
			pkce: PkceGenerator::default(),
			silent_renewer: None,
			dpop: None,
			status: watch::Sender::new(initial),
			pending_renewal: Mutex::new(None),
		}
	}

	/// Replaces the token error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Installs the host's silent renewal driver.
	pub fn with_silent_renewer(mut self, renewer: Arc<dyn SilentRenewer>) -> Self {
		self.silent_renewer = Some(renewer);

		self
	}

	/// Installs a DPoP proof generator for proof-of-possession mode.
	pub fn with_dpop_generator(mut self, generator: Arc<dyn DpopProofGenerator>) -> Self {
		self.dpop = Some(generator);

		self
	}

	/// Overrides the PKCE verifier generator.
	pub fn with_pkce_generator(mut self, pkce: PkceGenerator) -> Self {
		self.pkce = pkce;

		self
	}

	/// Configuration the client was built with.
	pub fn config(&self) -> &OidcClientConfig {
		&self.config
	}

	/// Token store scoped to this configuration.
	pub fn token_store(&self) -> &TokenStore {
		&self.tokens
	}

	/// Current session status.
	pub fn status(&self) -> SessionStatus {
		*self.status.borrow()
	}

	/// Subscribes to session status transitions.
	pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
		self.status.subscribe()
	}

	/// Current token set, if any, regardless of expiry.
	pub fn tokens(&self) -> Result<Option<TokenSet>> {
		self.tokens.tokens()
	}

	/// Current token set when it has not expired.
	pub fn valid_tokens(&self) -> Result<Option<TokenSet>> {
		Ok(self.tokens.tokens()?.filter(|tokens| validation::is_valid(Some(tokens))))
	}

	/// Cached or freshly fetched discovery document; `None` when the issuer answers non-200.
	pub async fn server_configuration(&self) -> Result<Option<ServerConfiguration>> {
		self.discovery
			.fetch_configuration(
				&self.config.authority,
				self.config.discovery_ttl,
				self.discovery_storage.as_ref(),
			)
			.await
	}

	pub(crate) async fn require_server_configuration(&self) -> Result<ServerConfiguration> {
		self.server_configuration().await?.ok_or_else(|| {
			ProtocolError::DiscoveryUnavailable {
				issuer: self.config.authority.as_str().trim_end_matches('/').to_owned(),
			}
			.into()
		})
	}

	pub(crate) fn set_status(&self, status: SessionStatus) {
		self.status.send_replace(status);
	}
}
#[cfg(feature = "reqwest")]
impl OidcClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client with its own reqwest transport and the storage selected by `config`.
	///
	/// Tokens and discovery documents share the configured backend.
	pub fn new(config: OidcClientConfig) -> Result<Self> {
		let storage = config.storage.open()?;

		Ok(Self::with_http_client(
			config,
			storage.clone(),
			storage,
			ReqwestHttpClient::new()?,
			Arc::new(ReqwestTransportErrorMapper),
		))
	}
}
impl<C, M> Debug for OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OidcClient")
			.field("configuration_name", &self.config.configuration_name)
			.field("client_id", &self.config.client_id)
			.field("status", &self.status())
			.field("silent_renewer_set", &self.silent_renewer.is_some())
			.field("dpop_set", &self.dpop.is_some())
			.finish()
	}
}
