//! Authenticated calls and logout for an established session.

// crates.io
use oauth2::{
	HttpRequest, HttpResponse,
	http::{Method, Request, StatusCode},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ProtocolError, StateError},
	flows::{OidcClient, SessionStatus},
	http::{self, OidcHttpClient},
	oauth::{self, RevocationResult, TokenTypeHint, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Attaches the held access token to `request`.
	///
	/// Sets `Accept: application/json` when the caller chose no media type. In
	/// proof-of-possession mode with a proof generator installed the `PoP` scheme and a `DPoP`
	/// header are used; otherwise the token is sent as a bearer token.
	pub fn authorize_request(&self, request: &mut HttpRequest) -> Result<()> {
		let tokens = self
			.valid_tokens()?
			.ok_or(StateError::NotAuthenticated { status: self.status().as_str() })?;
		let proof = if self.config.demonstrating_proof_of_possession {
			self.dpop.as_deref()
		} else {
			None
		};

		http::ensure_json_accept(request);
		http::attach_credentials(request, tokens.access_token.expose(), proof)
	}

	/// Sends `request` with the held credentials through the client's transport.
	///
	/// The call is bounded by the request timeout and is not retried.
	pub async fn fetch_with_tokens(&self, mut request: HttpRequest) -> Result<HttpResponse> {
		self.authorize_request(&mut request)?;

		let endpoint = http::request_url(&request)?;

		oauth::send_with_timeout(
			self.http.as_ref(),
			self.mapper.as_ref(),
			&endpoint,
			request,
			self.config.request_timeout,
		)
		.await
	}

	/// Fetches the user-info document of the signed-in user.
	pub async fn user_info(&self) -> Result<JsonMap<String, JsonValue>> {
		let server = self.require_server_configuration().await?;
		let endpoint = server
			.userinfo_endpoint
			.as_ref()
			.ok_or(ConfigError::MissingEndpoint { endpoint: "userinfo" })?;
		let request = Request::builder()
			.method(Method::GET)
			.uri(endpoint.as_str())
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let response = self.fetch_with_tokens(request).await?;

		if response.status() != StatusCode::OK {
			return Err(ProtocolError::UserInfoRejected { status: response.status().as_u16() }.into());
		}

		let mut deserializer = serde_json::Deserializer::from_slice(response.body());

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ProtocolError::UserInfoParse { source }.into())
	}

	/// Ends the session.
	///
	/// Held tokens are revoked when the issuer advertises a revocation endpoint. The access and
	/// refresh tokens are revoked independently. Revocation failures never block logout: the
	/// token store is cleared and the session returns to [`SessionStatus::Unauthenticated`]
	/// either way. The returned result reports whether every revocation call was accepted.
	///
	/// A relay configured through [`OidcClient::init_relay`] keeps its own copy of the tokens;
	/// use [`OidcClient::logout_with_relay`] to clear it as well.
	pub async fn logout(&self) -> Result<RevocationResult> {
		let held = self.tokens.tokens()?;
		let mut revoked = RevocationResult { success: false };

		if let Some(tokens) = held
			&& let Ok(Some(server)) = self.server_configuration().await
			&& let Some(endpoint) = &server.revocation_endpoint
		{
			let span = FlowSpan::new(FlowKind::Revocation, "logout");

			revoked = span
				.instrument(async {
					let mut success = self
						.revoke_held(endpoint, tokens.access_token.expose(), TokenTypeHint::AccessToken)
						.await;

					if let Some(refresh_token) = &tokens.refresh_token {
						success &= self
							.revoke_held(endpoint, refresh_token.expose(), TokenTypeHint::RefreshToken)
							.await;
					}

					RevocationResult { success }
				})
				.await;
		}

		self.tokens.clear()?;
		self.set_status(SessionStatus::Unauthenticated);

		Ok(revoked)
	}

	async fn revoke_held(&self, endpoint: &Url, token: &str, hint: TokenTypeHint) -> bool {
		const KIND: FlowKind = FlowKind::Revocation;

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result =
			self.token_client.revoke(endpoint, token, hint, &self.config.client_id).await;

		obs::record_result(KIND, &result);

		match result {
			Ok(result) => result.success,
			Err(e) => {
				obs::log_ignored_failure("revoke", &e);

				false
			},
		}
	}
}
