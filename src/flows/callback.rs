//! Callback parsing and the code-exchange half of the login round trip.

// crates.io
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	config::QueryMode,
	error::{ProtocolError, StateError},
	flows::{GrantKind, OidcClient, SessionStatus},
	http::OidcHttpClient,
	oauth::{AuthorizationCodeParams, TokenResult, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	validation,
};

/// Parameters an authorization server may append to the redirect URI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
	/// Authorization code.
	pub code: Option<String>,
	/// Echoed `state`.
	pub state: Option<String>,
	/// OIDC session management `session_state`.
	pub session_state: Option<String>,
	/// OAuth error code.
	pub error: Option<String>,
	/// OAuth error description.
	pub error_description: Option<String>,
}
impl CallbackParams {
	/// Reads callback parameters from `url`.
	///
	/// [`QueryMode::Hash`] reads the fragment, falling back to the query string when the
	/// fragment is absent, and accepts a `?code` key produced by routers that place the query
	/// inside the fragment. [`QueryMode::NoHash`] reads the query string.
	pub fn parse(url: &Url, mode: QueryMode) -> Self {
		let raw = match mode {
			QueryMode::Hash => url.fragment().or_else(|| url.query()),
			QueryMode::NoHash => url.query(),
		}
		.unwrap_or_default();
		let mut params = Self::default();

		for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
			let key = match mode {
				QueryMode::Hash if key.ends_with("?code") => "code",
				_ => &*key,
			};
			let slot = match key {
				"code" => &mut params.code,
				"state" => &mut params.state,
				"session_state" => &mut params.session_state,
				"error" => &mut params.error,
				"error_description" => &mut params.error_description,
				_ => continue,
			};

			*slot = Some(value.into_owned());
		}

		params
	}
}

impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Completes a login round trip from the URL the browser landed on.
	///
	/// The pending authorization state is consumed whether or not the exchange succeeds. On
	/// failure any held token set is discarded and the session returns to
	/// [`SessionStatus::Unauthenticated`].
	pub async fn login_callback(&self, callback_url: &Url) -> Result<TokenSet> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::new(KIND, "login_callback");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let params = CallbackParams::parse(callback_url, self.config.query_mode);

				self.complete_authorization(params, &self.config.redirect_uri, None).await
			})
			.await;

		obs::record_result(KIND, &result);

		match &result {
			Ok(_) => self.set_status(SessionStatus::Authenticated),
			Err(_) => {
				if let Err(e) = self.tokens.clear_tokens() {
					obs::log_ignored_failure("clear_tokens", &e);
				}

				self.set_status(SessionStatus::Unauthenticated);
			},
		}

		result
	}

	pub(crate) async fn complete_authorization(
		&self,
		params: CallbackParams,
		redirect_uri: &Url,
		previous: Option<&TokenSet>,
	) -> Result<TokenSet> {
		let pending = self.tokens.take_authorization_state()?;

		if let Some(error) = params.error {
			return Err(ProtocolError::AuthorizationDenied {
				error,
				description: params.error_description,
			}
			.into());
		}
		if params.state.as_deref() != Some(pending.state.as_str()) {
			return Err(StateError::StateMismatch.into());
		}

		let code = params.code.ok_or(ProtocolError::MissingCallbackParameter { name: "code" })?;
		let server = self.require_server_configuration().await?;
		let mut extras = self.config.token_request_extras.clone();

		self.strategy.augment_token_request(GrantKind::AuthorizationCode, &mut extras);

		let code_params = AuthorizationCodeParams {
			code,
			code_verifier: pending.code_verifier,
			redirect_uri: redirect_uri.clone(),
			client_id: self.config.client_id.clone(),
		};
		let tokens = match self
			.token_client
			.exchange_authorization_code(
				&server.token_endpoint,
				&code_params,
				&extras,
				previous,
				self.config.token_renew_mode,
			)
			.await?
		{
			TokenResult::Success { tokens, .. } => tokens,
			TokenResult::Failure(failure) =>
				return Err(ProtocolError::CodeExchangeRejected { status: failure.status }.into()),
		};
		let verdict = validation::validate_against_server_with(
			&tokens,
			Some(&pending.nonce),
			&server,
			self.config.nonce_policy,
			OffsetDateTime::now_utc(),
		);

		if !verdict.is_valid {
			return Err(Error::Validation { reason: verdict.reason });
		}

		self.tokens.save_tokens(&tokens)?;

		Ok(tokens)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("Callback fixture should parse.")
	}

	#[test]
	fn query_mode_reads_the_query_string() {
		let params = CallbackParams::parse(
			&url("https://app.example.com/callback?code=abc&state=xyz&session_state=s1#ignored=1"),
			QueryMode::NoHash,
		);

		assert_eq!(params.code.as_deref(), Some("abc"));
		assert_eq!(params.state.as_deref(), Some("xyz"));
		assert_eq!(params.session_state.as_deref(), Some("s1"));
		assert_eq!(params.error, None);
	}

	#[test]
	fn hash_mode_reads_the_fragment_and_repairs_code_keys() {
		let params = CallbackParams::parse(
			&url("https://app.example.com/#/callback?code=abc&state=xyz"),
			QueryMode::Hash,
		);

		assert_eq!(params.code.as_deref(), Some("abc"));
		assert_eq!(params.state.as_deref(), Some("xyz"));
	}

	#[test]
	fn error_parameters_are_decoded() {
		let params = CallbackParams::parse(
			&url("https://app.example.com/callback?error=access_denied&error_description=User%20cancelled"),
			QueryMode::NoHash,
		);

		assert_eq!(params.error.as_deref(), Some("access_denied"));
		assert_eq!(params.error_description.as_deref(), Some("User cancelled"));
		assert_eq!(params.code, None);
	}
}
