//! Interception pipeline: plan, prepare, forward, launder.
//!
//! Each step is a plain function over the session state so it can be exercised without a
//! running worker.

// crates.io
use oauth2::{
	HttpRequest, HttpResponse,
	http::{Method, StatusCode},
};
use url::form_urlencoded::{self, Serializer};
// self
use crate::{
	_prelude::*,
	auth::{TokenResponse, TokenSet},
	http::{self, DpopProofGenerator},
	relay::{self, RelaySessionState},
};

const EXPIRES_AT_FIELD: &str = "expiresAt";

/// What the relay does with one outgoing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPlan {
	/// Token endpoint POST: restore placeholders, then launder the response.
	Launder,
	/// Revocation endpoint POST: restore placeholders only.
	RestorePlaceholders,
	/// Trusted origin with a held token set: attach real credentials.
	Augment,
	/// Forward untouched.
	Passthrough,
}

/// Inputs needed to launder a token endpoint response.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunderContext {
	/// Token set held when the request was prepared.
	pub previous: Option<TokenSet>,
	/// Whether access tokens are replaced by placeholders.
	pub hide_access_token: bool,
	/// Configuration whose placeholders are issued.
	pub configuration_name: String,
}
impl Debug for LaunderContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LaunderContext")
			.field("previous_held", &self.previous.is_some())
			.field("hide_access_token", &self.hide_access_token)
			.field("configuration_name", &self.configuration_name)
			.finish()
	}
}

/// Request ready to go upstream.
#[derive(Debug)]
pub struct PreparedRequest {
	/// Rewritten request.
	pub request: HttpRequest,
	/// Present when the response must be laundered.
	pub launder: Option<LaunderContext>,
}

/// Decides how `request` is handled.
///
/// A POST to the token endpoint takes precedence over augmentation. Augmentation requires a
/// held token set.
pub fn plan_request(session: &RelaySessionState, request: &HttpRequest) -> RequestPlan {
	let Ok(url) = http::request_url(request) else {
		return RequestPlan::Passthrough;
	};
	let is_post = request.method() == Method::POST;

	if is_post && session.is_token_endpoint(&url) {
		RequestPlan::Launder
	} else if is_post && session.is_revocation_endpoint(&url) {
		RequestPlan::RestorePlaceholders
	} else if session.tokens.is_some() && session.is_trusted(&url) {
		RequestPlan::Augment
	} else {
		RequestPlan::Passthrough
	}
}

/// Applies the plan for `request` against the held token set.
///
/// `proof` is only used when the session runs in proof-of-possession mode.
pub fn prepare_request(
	session: &RelaySessionState,
	mut request: HttpRequest,
	proof: Option<&dyn DpopProofGenerator>,
) -> Result<PreparedRequest> {
	let plan = plan_request(session, &request);
	let name = session.configuration_name.as_ref();
	let mut launder = None;

	match (plan, &session.tokens) {
		(RequestPlan::Launder, held) => {
			if let Some(tokens) = held {
				restore_placeholders(&mut request, tokens, name);
			}

			launder = Some(LaunderContext {
				previous: held.clone(),
				hide_access_token: session.hide_access_token,
				configuration_name: name.to_owned(),
			});
		},
		(RequestPlan::RestorePlaceholders, Some(tokens)) => {
			restore_placeholders(&mut request, tokens, name);
		},
		(RequestPlan::Augment, Some(tokens)) => {
			let proof = if session.demonstrating_proof_of_possession { proof } else { None };

			http::attach_credentials(&mut request, tokens.access_token.expose(), proof)?;
		},
		_ => {},
	}

	Ok(PreparedRequest { request, launder })
}

/// Replaces placeholder values in a form-encoded body with the real tokens.
///
/// Returns `true` when the body changed.
pub fn restore_placeholders(
	request: &mut HttpRequest,
	tokens: &TokenSet,
	configuration_name: &str,
) -> bool {
	let access_placeholder = relay::access_token_placeholder(configuration_name);
	let refresh_placeholder = relay::refresh_token_placeholder(configuration_name);
	let mut changed = false;
	let pairs = form_urlencoded::parse(request.body())
		.map(|(key, value)| {
			let real = if value == access_placeholder {
				Some(tokens.access_token.expose())
			} else if value == refresh_placeholder {
				tokens.refresh_token.as_ref().map(|token| token.expose())
			} else {
				None
			};

			match real {
				Some(real) => {
					changed = true;

					(key.into_owned(), real.to_owned())
				},
				None => (key.into_owned(), value.into_owned()),
			}
		})
		.collect::<Vec<_>>();

	if changed {
		*request.body_mut() = Serializer::new(String::new()).extend_pairs(pairs).finish().into_bytes();
	}

	changed
}

/// Launders a token endpoint response.
///
/// Only HTTP 200 JSON bodies carrying an `access_token` are rewritten. Returns the response
/// the page should observe and the real token set to hold, if any.
pub fn launder_response(
	mut response: HttpResponse,
	context: &LaunderContext,
	now: OffsetDateTime,
) -> (HttpResponse, Option<TokenSet>) {
	if response.status() != StatusCode::OK {
		return (response, None);
	}

	let Ok(mut body) = serde_json::from_slice::<JsonMap<String, JsonValue>>(response.body()) else {
		return (response, None);
	};
	let Some(tokens) = hide_tokens(
		&mut body,
		context.previous.as_ref(),
		context.hide_access_token,
		&context.configuration_name,
		now,
	) else {
		return (response, None);
	};

	match serde_json::to_vec(&body) {
		Ok(bytes) => *response.body_mut() = bytes,
		Err(_) => return (response, None),
	}

	(response, Some(tokens))
}

/// Replaces real tokens in a token endpoint body with placeholders.
///
/// The refresh token is always hidden; the access token only when `hide_access_token` is set.
/// A numeric `expiresAt` (Unix seconds) is added whatever form `issued_at`/`expires_in` took.
/// Returns the normalized real token set, or `None` when the body is not a token response. A
/// body whose lifetime cannot be normalized is still hidden and held as already expired.
pub fn hide_tokens(
	body: &mut JsonMap<String, JsonValue>,
	previous: Option<&TokenSet>,
	hide_access_token: bool,
	configuration_name: &str,
	now: OffsetDateTime,
) -> Option<TokenSet> {
	let response: TokenResponse = serde_json::from_value(JsonValue::Object(body.clone())).ok()?;
	let tokens = match TokenSet::from_response(&response, previous, now) {
		Ok(tokens) => tokens,
		Err(_) => expired_fallback(&response, previous, now)?,
	};

	if hide_access_token {
		body.insert(
			"access_token".into(),
			JsonValue::String(relay::access_token_placeholder(configuration_name)),
		);
	}
	if body.contains_key("refresh_token") {
		body.insert(
			"refresh_token".into(),
			JsonValue::String(relay::refresh_token_placeholder(configuration_name)),
		);
	}

	body.insert(EXPIRES_AT_FIELD.into(), JsonValue::from(tokens.expires_at.unix_timestamp()));

	Some(tokens)
}

fn expired_fallback(
	response: &TokenResponse,
	previous: Option<&TokenSet>,
	now: OffsetDateTime,
) -> Option<TokenSet> {
	let mut builder = TokenSet::builder()
		.access_token(response.access_token.clone())
		.issued_at(now)
		.expires_at(now);

	if let Some(refresh_token) = response
		.refresh_token
		.clone()
		.or_else(|| previous.and_then(|p| p.refresh_token.as_ref().map(|t| t.expose().to_owned())))
	{
		builder = builder.refresh_token(refresh_token);
	}
	if let Some(token_type) = &response.token_type {
		builder = builder.token_type(token_type.clone());
	}

	builder.build().ok()
}
