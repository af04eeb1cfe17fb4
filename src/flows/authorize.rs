//! Authorization redirect construction with PKCE, `state`, and `nonce`.

// self
use crate::{
	_prelude::*,
	discovery::ServerConfiguration,
	error::ConfigurationWarning,
	flows::{OidcClient, SessionStatus},
	http::OidcHttpClient,
	oauth::TransportErrorMapper,
	obs,
	pkce::{self, PkceGenerator},
	store::{AuthorizationState, TokenStore},
};

const STATE_LEN: usize = 32;
const NONCE_LEN: usize = 32;
const RESERVED_PARAMS: [&str; 4] = ["state", "nonce", "code_challenge", "code_challenge_method"];

/// Redirect the host must navigate to, plus the values persisted for the callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRedirect {
	/// Fully formed authorization URL.
	pub url: Url,
	/// Opaque `state` the callback must echo.
	pub state: String,
	/// Nonce the id token is expected to carry.
	pub nonce: String,
	/// Degraded-mode conditions hit while building the redirect.
	pub warnings: Vec<ConfigurationWarning>,
}
impl AuthorizationRedirect {
	/// `true` when the redirect carries PKCE parameters.
	pub fn uses_pkce(&self) -> bool {
		self.url.query_pairs().any(|(key, _)| key == "code_challenge")
	}
}

/// Builds an authorization redirect against `authorization_endpoint`.
///
/// A fresh [`AuthorizationState`] overwrites any pending one before the URL is returned.
/// `params` are appended verbatim except for the reserved `state`, `nonce`, and PKCE keys,
/// which this function owns. When the PKCE challenge cannot be derived the redirect is built
/// without PKCE parameters and a [`ConfigurationWarning::PkceUnavailable`] is reported.
pub fn build_authorization_redirect(
	authorization_endpoint: &Url,
	params: &BTreeMap<String, String>,
	store: &TokenStore,
	generator: &PkceGenerator,
) -> Result<AuthorizationRedirect> {
	let state = pkce::random_string(STATE_LEN);
	let nonce = pkce::random_string(NONCE_LEN);
	let mut warnings = Vec::new();
	let pair = match generator.generate() {
		Ok(pair) => Some(pair),
		Err(e) => {
			warnings.push(ConfigurationWarning::PkceUnavailable {
				reason: e.to_string().trim_end_matches('.').to_owned(),
			});

			None
		},
	};

	store.save_authorization_state(&AuthorizationState {
		code_verifier: pair.as_ref().map(|pair| pair.verifier.clone()),
		state: state.clone(),
		nonce: nonce.clone(),
	})?;

	let mut url = authorization_endpoint.clone();

	{
		let mut query = url.query_pairs_mut();

		params
			.iter()
			.filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
			.for_each(|(key, value)| {
				query.append_pair(key, value);
			});
		query.append_pair("state", &state);
		query.append_pair("nonce", &nonce);

		if let Some(pair) = &pair {
			query.append_pair("code_challenge", &pair.challenge);
			query.append_pair("code_challenge_method", pair.method.as_str());
		}
	}

	Ok(AuthorizationRedirect { url, state, nonce, warnings })
}

impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Starts a login round trip and returns the redirect the host must navigate to.
	///
	/// `extras` override the configured authorization extras; both are appended after the
	/// core `client_id`, `redirect_uri`, `scope`, and `response_type` parameters.
	pub async fn login(&self, extras: BTreeMap<String, String>) -> Result<AuthorizationRedirect> {
		let server = self.require_server_configuration().await?;
		let redirect =
			self.authorization_redirect(&server, &self.config.redirect_uri, &extras)?;

		self.set_status(SessionStatus::Authorizing);

		Ok(redirect)
	}

	pub(crate) fn authorization_redirect(
		&self,
		server: &ServerConfiguration,
		redirect_uri: &Url,
		extras: &BTreeMap<String, String>,
	) -> Result<AuthorizationRedirect> {
		let mut params = BTreeMap::from([
			("client_id".to_owned(), self.config.client_id.to_string()),
			("redirect_uri".to_owned(), redirect_uri.to_string()),
			("scope".to_owned(), self.config.requested_scope()),
			("response_type".to_owned(), "code".to_owned()),
		]);

		params.extend(self.config.extras.iter().map(|(k, v)| (k.clone(), v.clone())));
		params.extend(extras.iter().map(|(k, v)| (k.clone(), v.clone())));

		let mut redirect = build_authorization_redirect(
			&server.authorization_endpoint,
			&params,
			&self.tokens,
			&self.pkce,
		)?;

		if self.config.demonstrating_proof_of_possession && self.dpop.is_none() {
			redirect.warnings.push(ConfigurationWarning::ProofOfPossessionUnavailable);
		}

		redirect.warnings.iter().for_each(obs::record_warning);

		Ok(redirect)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{auth::ConfigurationName, store::MemoryStorage};

	fn store() -> TokenStore {
		TokenStore::new(Arc::new(MemoryStorage::default()), &ConfigurationName::default())
	}

	fn endpoint() -> Url {
		Url::parse("https://idp.example.com/authorize?audience=api")
			.expect("Authorization endpoint fixture should parse.")
	}

	#[test]
	fn redirect_carries_pkce_and_persists_state() {
		let store = store();
		let params = BTreeMap::from([
			("client_id".to_owned(), "demo".to_owned()),
			("state".to_owned(), "attacker".to_owned()),
		]);
		let redirect =
			build_authorization_redirect(&endpoint(), &params, &store, &PkceGenerator::default())
				.expect("Redirect should build.");
		let query: BTreeMap<String, String> = redirect.url.query_pairs().into_owned().collect();
		let pending = store.take_authorization_state().expect("State should be persisted.");

		assert!(redirect.uses_pkce());
		assert!(redirect.warnings.is_empty());
		assert_eq!(query["audience"], "api");
		assert_eq!(query["client_id"], "demo");
		assert_eq!(query["state"], redirect.state);
		assert_eq!(query["nonce"], redirect.nonce);
		assert_eq!(query["code_challenge_method"], "S256");
		assert_eq!(pending.state, redirect.state);
		assert_eq!(pending.nonce, redirect.nonce);
		assert_eq!(
			pkce::derive_challenge(
				pending.code_verifier.as_deref().expect("Verifier should be persisted.")
			)
			.expect("Persisted verifier should derive."),
			query["code_challenge"]
		);
	}

	#[test]
	fn failed_challenge_drops_pkce_with_warning() {
		let store = store();
		let redirect = build_authorization_redirect(
			&endpoint(),
			&BTreeMap::new(),
			&store,
			&PkceGenerator::new(8),
		)
		.expect("Redirect should build without PKCE.");

		assert!(!redirect.uses_pkce());
		assert!(matches!(
			redirect.warnings.as_slice(),
			[ConfigurationWarning::PkceUnavailable { .. }]
		));
		assert_eq!(
			store.take_authorization_state().expect("State should be persisted.").code_verifier,
			None
		);
	}

	#[test]
	fn a_new_redirect_overwrites_pending_state() {
		let store = store();
		let generator = PkceGenerator::default();
		let _first = build_authorization_redirect(&endpoint(), &BTreeMap::new(), &store, &generator)
			.expect("First redirect should build.");
		let second =
			build_authorization_redirect(&endpoint(), &BTreeMap::new(), &store, &generator)
				.expect("Second redirect should build.");

		assert_eq!(
			store.take_authorization_state().expect("State should be persisted.").state,
			second.state
		);
	}
}
