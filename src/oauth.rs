//! Token endpoint client: authorization-code exchange, refresh, and revocation.
//!
//! Every call follows the same discipline: parameters are form-encoded and POSTed, each attempt
//! is bounded by a timeout, and a transient failure (abort or connection error) is retried
//! exactly once. Non-200 answers are returned as structured results instead of errors.

pub use oauth2;

// crates.io
use oauth2::{
	HttpClientError, HttpRequest, HttpResponse,
	http::{
		Method, Request, StatusCode,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use url::form_urlencoded::Serializer;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, TokenResponse, TokenSet},
	config::TokenRenewMode,
	error::{ConfigError, ProtocolError, TransientError, TransportError},
	http::OidcHttpClient,
	obs,
};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::seconds(10);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Maps HTTP transport failures into engine [`Error`] values.
///
/// Returning [`Error::Transient`] marks the failure as retryable.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an engine error.
	fn map_transport_error(&self, endpoint: &str, error: HttpClientError<E>) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, endpoint: &str, err: HttpClientError<ReqwestError>) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(endpoint, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				TransientError::Network { endpoint: endpoint.to_owned(), message }.into(),
			_ => TransientError::Network {
				endpoint: endpoint.to_owned(),
				message: "Unknown HTTP client failure".into(),
			}
			.into(),
		}
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(endpoint: &str, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() || err.is_connect() || err.is_request() {
		return TransientError::Network { endpoint: endpoint.to_owned(), message: err.to_string() }
			.into();
	}

	TransportError::network(endpoint, err).into()
}

/// `token_type_hint` values accepted by revocation endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenTypeHint {
	/// `access_token`.
	AccessToken,
	/// `refresh_token`.
	RefreshToken,
}
impl TokenTypeHint {
	/// Returns the RFC 7009 identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AccessToken => "access_token",
			Self::RefreshToken => "refresh_token",
		}
	}
}

/// Parameters of an `authorization_code` grant.
#[derive(Clone, Debug)]
pub struct AuthorizationCodeParams {
	/// Code received on the callback.
	pub code: String,
	/// PKCE verifier, when PKCE was used.
	pub code_verifier: Option<String>,
	/// Redirect URI used for the authorization request.
	pub redirect_uri: Url,
	/// OAuth client identifier.
	pub client_id: ClientId,
}

/// Token endpoint refusal (any non-200 status).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenFailure {
	/// HTTP status code.
	pub status: u16,
	/// OAuth `error` code, when the body carried one.
	pub oauth_error: Option<String>,
	/// OAuth `error_description`, when the body carried one.
	pub error_description: Option<String>,
}

/// Outcome of a token grant call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenResult {
	/// HTTP 200 with a usable token response.
	Success {
		/// Normalized token set.
		tokens: TokenSet,
		/// Instant renewal should complete by, according to the requested renew mode.
		renewal_deadline: OffsetDateTime,
	},
	/// Any other status.
	Failure(TokenFailure),
}
impl TokenResult {
	/// Returns `true` for [`TokenResult::Success`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success { .. })
	}

	/// HTTP status behind the result.
	pub fn status(&self) -> u16 {
		match self {
			Self::Success { .. } => StatusCode::OK.as_u16(),
			Self::Failure(failure) => failure.status,
		}
	}
}

/// Outcome of a revocation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevocationResult {
	/// `true` when the endpoint answered 200.
	pub success: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
	error: Option<String>,
	error_description: Option<String>,
}

/// Performs grant and revocation calls against token endpoints.
pub struct TokenRequestClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http: Arc<C>,
	mapper: Arc<M>,
	timeout: Duration,
}
impl<C, M> TokenRequestClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client with the default 10 second timeout.
	pub fn new(http: impl Into<Arc<C>>, mapper: impl Into<Arc<M>>) -> Self {
		Self { http: http.into(), mapper: mapper.into(), timeout: DEFAULT_TIMEOUT }
	}

	/// Overrides the per-attempt timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Per-attempt timeout.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Exchanges an authorization code.
	///
	/// `extras` are appended for keys the grant does not already set. Fields the response
	/// omits are inherited from `previous`.
	pub async fn exchange_authorization_code(
		&self,
		endpoint: &Url,
		params: &AuthorizationCodeParams,
		extras: &BTreeMap<String, String>,
		previous: Option<&TokenSet>,
		mode: TokenRenewMode,
	) -> Result<TokenResult> {
		let mut form = BTreeMap::from([
			("grant_type".to_owned(), "authorization_code".to_owned()),
			("code".to_owned(), params.code.clone()),
			("redirect_uri".to_owned(), params.redirect_uri.to_string()),
			("client_id".to_owned(), params.client_id.to_string()),
		]);

		if let Some(verifier) = &params.code_verifier {
			form.insert("code_verifier".into(), verifier.clone());
		}

		merge_extras(&mut form, extras);

		let response = self.post_form(endpoint, &form).await?;

		token_result(response, previous, mode)
	}

	/// Runs a `refresh_token` grant.
	pub async fn refresh_tokens(
		&self,
		endpoint: &Url,
		refresh_token: &str,
		client_id: &ClientId,
		extras: &BTreeMap<String, String>,
		previous: Option<&TokenSet>,
		mode: TokenRenewMode,
	) -> Result<TokenResult> {
		let mut form = BTreeMap::from([
			("grant_type".to_owned(), "refresh_token".to_owned()),
			("refresh_token".to_owned(), refresh_token.to_owned()),
			("client_id".to_owned(), client_id.to_string()),
		]);

		merge_extras(&mut form, extras);

		let response = self.post_form(endpoint, &form).await?;

		token_result(response, previous, mode)
	}

	/// Revokes `token`; non-200 answers yield `success == false`.
	pub async fn revoke(
		&self,
		endpoint: &Url,
		token: &str,
		hint: TokenTypeHint,
		client_id: &ClientId,
	) -> Result<RevocationResult> {
		let form = BTreeMap::from([
			("token".to_owned(), token.to_owned()),
			("token_type_hint".to_owned(), hint.as_str().to_owned()),
			("client_id".to_owned(), client_id.to_string()),
		]);
		let response = self.post_form(endpoint, &form).await?;

		Ok(RevocationResult { success: response.status() == StatusCode::OK })
	}

	async fn post_form(
		&self,
		endpoint: &Url,
		form: &BTreeMap<String, String>,
	) -> Result<HttpResponse> {
		let body = Serializer::new(String::new()).extend_pairs(form.iter()).finish();
		let mut retried = false;

		loop {
			let request = form_request(endpoint, &body)?;

			match self.send(endpoint, request).await {
				Err(e) if e.is_transient() && !retried => {
					obs::log_retry(endpoint.as_str(), &e);

					retried = true;
				},
				result => return result,
			}
		}
	}

	async fn send(&self, endpoint: &Url, request: HttpRequest) -> Result<HttpResponse> {
		send_with_timeout(self.http.as_ref(), self.mapper.as_ref(), endpoint, request, self.timeout)
			.await
	}
}
impl<C, M> Clone for TokenRequestClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { http: self.http.clone(), mapper: self.mapper.clone(), timeout: self.timeout }
	}
}
impl<C, M> Debug for TokenRequestClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRequestClient").field("timeout", &self.timeout).finish()
	}
}

/// Executes one request, aborting it when `timeout` elapses first.
pub(crate) async fn send_with_timeout<C, M>(
	http: &C,
	mapper: &M,
	endpoint: &Url,
	request: HttpRequest,
	timeout: Duration,
) -> Result<HttpResponse>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	match tokio::time::timeout(timeout.unsigned_abs(), http.execute(request)).await {
		Ok(Ok(response)) => Ok(response),
		Ok(Err(e)) => Err(mapper.map_transport_error(endpoint.as_str(), e)),
		Err(_) => Err(TransientError::Timeout { endpoint: endpoint.to_string(), timeout }.into()),
	}
}

fn form_request(endpoint: &Url, body: &str) -> Result<HttpRequest> {
	Request::builder()
		.method(Method::POST)
		.uri(endpoint.as_str())
		.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
		.header(ACCEPT, "application/json")
		.body(body.as_bytes().to_vec())
		.map_err(|e| ConfigError::from(e).into())
}

fn merge_extras(form: &mut BTreeMap<String, String>, extras: &BTreeMap<String, String>) {
	for (key, value) in extras {
		form.entry(key.clone()).or_insert_with(|| value.clone());
	}
}

fn token_result(
	response: HttpResponse,
	previous: Option<&TokenSet>,
	mode: TokenRenewMode,
) -> Result<TokenResult> {
	let status = response.status();

	if status != StatusCode::OK {
		let body: ErrorBody = serde_json::from_slice(response.body()).unwrap_or_default();

		return Ok(TokenResult::Failure(TokenFailure {
			status: status.as_u16(),
			oauth_error: body.error,
			error_description: body.error_description,
		}));
	}

	let mut deserializer = serde_json::Deserializer::from_slice(response.body());
	let parsed: TokenResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| ProtocolError::TokenResponseParse { source })?;
	let tokens = TokenSet::from_response(&parsed, previous, OffsetDateTime::now_utc())?;
	let renewal_deadline = tokens.renewal_deadline(mode);

	Ok(TokenResult::Success { tokens, renewal_deadline })
}
