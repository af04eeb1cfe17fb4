//! Transport primitives shared by discovery, token requests, and the relay.
//!
//! [`OidcHttpClient`] is the engine's only dependency on an HTTP stack. Requests and responses
//! use the `oauth2` crate's [`HttpRequest`]/[`HttpResponse`] aliases (plain `http` types with
//! byte bodies), so a transport can be a reqwest client, a test double, or the relay worker.

// std
use std::ops::Deref;
// crates.io
use oauth2::{
	HttpClientError, HttpRequest, HttpResponse,
	http::{
		HeaderValue,
		header::{ACCEPT, AUTHORIZATION},
	},
};
// self
use crate::{_prelude::*, error::ConfigError};

/// Header carrying a DPoP proof.
pub const DPOP_HEADER: &str = "dpop";

/// Boxed future returned by [`OidcHttpClient::execute`].
pub type HttpFuture<'a, E> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError<E>>> + 'a + Send>>;

/// Abstraction over HTTP transports able to execute engine requests.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared by the
/// client, the discovery cache, and the relay worker without extra wrappers. Implementations
/// must not follow redirects for token endpoint calls.
pub trait OidcHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends `request` and resolves with the full response, whatever its status.
	fn execute(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError>;
}

/// Produces DPoP proofs for proof-of-possession requests.
pub trait DpopProofGenerator
where
	Self: Send + Sync,
{
	/// Builds a proof JWT bound to the request method and URL.
	fn generate_proof(&self, method: &str, url: &str) -> Result<String>;
}

/// Attaches the access token to `request`.
///
/// Without a proof generator the token is sent as `Authorization: Bearer <token>`. With one,
/// the scheme becomes `PoP` and a `DPoP` header carries the proof.
pub fn attach_credentials(
	request: &mut HttpRequest,
	access_token: &str,
	proof: Option<&dyn DpopProofGenerator>,
) -> Result<()> {
	let value = match proof {
		Some(generator) => {
			let dpop = generator
				.generate_proof(request.method().as_str(), &request.uri().to_string())?;

			request.headers_mut().insert(DPOP_HEADER, header_value(&dpop)?);

			format!("PoP {access_token}")
		},
		None => format!("Bearer {access_token}"),
	};

	request.headers_mut().insert(AUTHORIZATION, header_value(&value)?);

	Ok(())
}

/// Sets `Accept: application/json` unless the caller chose another media type.
pub fn ensure_json_accept(request: &mut HttpRequest) {
	request.headers_mut().entry(ACCEPT).or_insert(HeaderValue::from_static("application/json"));
}

/// Parses a URL carried by a request or response.
pub(crate) fn request_url(request: &HttpRequest) -> Result<Url> {
	Url::parse(&request.uri().to_string()).map_err(|source| {
		ConfigError::InvalidEndpoint { endpoint: "request", source }.into()
	})
}

fn header_value(value: &str) -> Result<HeaderValue> {
	HeaderValue::from_str(value).map_err(|e| ConfigError::HttpRequest(e.into()).into())
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Token endpoints return results directly instead of delegating to another URI, so the
/// default client is built with redirects disabled.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with redirect following disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client =
			ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl OidcHttpClient for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn execute(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let response =
				client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}
