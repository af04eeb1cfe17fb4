//! Engine-level error types shared across flows, transports, stores, and the relay.

// self
use crate::_prelude::*;

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
///
/// Non-200 answers from OIDC endpoints are not errors; they surface as structured
/// [`TokenResult`](crate::oauth::TokenResult) values so callers can branch on the status.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Abort or connection failure; already retried once when surfaced by token calls.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Non-transient transport failure (malformed request, I/O, decoding).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Endpoint or callback returned data the engine cannot use.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// Authorization or renewal step invoked in an invalid state.
	#[error(transparent)]
	State(#[from] StateError),
	/// Renewal failed; the variant tells whether the session survived.
	#[error(transparent)]
	Renewal(#[from] RenewalError),

	/// Token set failed issuer, nonce, or expiry validation during callback processing.
	#[error("Token validation failed: {reason}.")]
	Validation {
		/// Validator-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Returns `true` for faults that a single retry may resolve.
	pub fn is_transient(&self) -> bool {
		matches!(self, Error::Transient(_))
	}
}

/// Configuration and validation failures raised by the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Client configuration failed validation.
	#[error(transparent)]
	InvalidConfig(#[from] crate::config::ConfigBuildError),
	/// An endpoint URL cannot be parsed.
	#[error("The {endpoint} endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The discovery document does not advertise a required endpoint.
	#[error("The issuer does not advertise a {endpoint} endpoint.")]
	MissingEndpoint {
		/// Endpoint label.
		endpoint: &'static str,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token set builder validation failed.
	#[error("Unable to build token set.")]
	TokenBuild(#[from] crate::auth::TokenSetBuilderError),
	/// Token endpoint response omitted `expires_in` and no id token expiry was available.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an `expires_in` that is not a usable integer.
	#[error("The expires_in value `{value}` is not a valid number of seconds.")]
	InvalidExpiresIn {
		/// Raw value received from the endpoint.
		value: String,
	},
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Abort and connection failures (safe to retry once).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// The request did not complete before the timeout fired and was aborted.
	#[error("Request to {endpoint} was aborted after {timeout}.")]
	Timeout {
		/// Target endpoint.
		endpoint: String,
		/// Timeout that elapsed.
		timeout: Duration,
	},
	/// The connection could not be established or was dropped.
	#[error("Network request to {endpoint} failed: {message}.")]
	Network {
		/// Target endpoint.
		endpoint: String,
		/// Transport-supplied message.
		message: String,
	},
}

/// Transport-level failures that must not be retried.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a non-transient failure.
	#[error("Network error occurred while calling {endpoint}.")]
	Network {
		/// Target endpoint.
		endpoint: String,
		/// Transport-specific error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		endpoint: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { endpoint: endpoint.into(), source: Box::new(src) }
	}
}

/// Malformed or negative protocol data.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// Discovery document could not be parsed.
	#[error("Discovery document for {issuer} is malformed.")]
	DiscoveryParse {
		/// Issuer whose document failed to parse.
		issuer: String,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Discovery endpoint answered with a non-200 status.
	#[error("Discovery document for {issuer} is unavailable.")]
	DiscoveryUnavailable {
		/// Issuer that could not be resolved.
		issuer: String,
	},
	/// Token endpoint answered 200 with a body that is not a token response.
	#[error("Token endpoint returned a malformed response.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Authorization server redirected back with an `error` parameter.
	#[error("Authorization server returned `{error}`.")]
	AuthorizationDenied {
		/// OAuth error code.
		error: String,
		/// Optional `error_description`.
		description: Option<String>,
	},
	/// Callback URL lacks a required parameter.
	#[error("Callback is missing the `{name}` parameter.")]
	MissingCallbackParameter {
		/// Parameter name.
		name: &'static str,
	},
	/// Token endpoint rejected the authorization code.
	#[error("Token endpoint rejected the code exchange with HTTP {status}.")]
	CodeExchangeRejected {
		/// HTTP status code.
		status: u16,
	},
	/// User-info endpoint answered with a non-200 status.
	#[error("User-info endpoint answered HTTP {status}.")]
	UserInfoRejected {
		/// HTTP status code.
		status: u16,
	},
	/// User-info endpoint answered 200 with a body that is not a JSON object.
	#[error("User-info endpoint returned a malformed response.")]
	UserInfoParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The relay worker is no longer running.
	#[error("Relay worker channel is closed.")]
	RelayDisconnected,
}

/// Operations invoked against an incompatible engine state.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StateError {
	/// No pending authorization state exists (never issued or already consumed).
	#[error("No pending authorization state; it was never issued or was already consumed.")]
	MissingAuthorizationState,
	/// Callback `state` does not match the pending authorization state.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// Renewal requested while no refresh token or silent renewal is available.
	#[error("No refresh token or silent renewal is available.")]
	NoRenewalCredential,
	/// Operation requires an authenticated session.
	#[error("Operation requires an authenticated session; current status is {status}.")]
	NotAuthenticated {
		/// Status label at the time of the call.
		status: &'static str,
	},
}

/// Cloneable renewal failure shared with every caller attached to the in-flight renewal.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RenewalError {
	/// Renewal failed but the existing session remains usable.
	#[error("Token renewal failed: {reason}.")]
	Failed {
		/// Failure summary.
		reason: String,
		/// HTTP status, when the endpoint answered.
		status: Option<u16>,
	},
	/// The refresh credential is invalid or revoked; full re-authentication is required.
	#[error("Session lost: {reason}.")]
	SessionLost {
		/// Failure summary.
		reason: String,
	},
	/// Silent renewal did not complete within its bound.
	#[error("Silent renewal timed out after {0}.")]
	SilentTimeout(Duration),
	/// Renewal could not start because the session lacks a renewal credential.
	#[error(transparent)]
	State(#[from] StateError),
}

/// Degraded-mode conditions that are logged and returned, never raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationWarning {
	/// Relay protocol version differs from the page engine's version.
	RelayVersionMismatch {
		/// Version compiled into the worker.
		worker: String,
		/// Version announced by the page.
		script: String,
	},
	/// PKCE challenge derivation failed; the request was sent without PKCE parameters.
	PkceUnavailable {
		/// Derivation failure summary.
		reason: String,
	},
	/// Proof-of-possession was requested but no proof generator is installed.
	ProofOfPossessionUnavailable,
}
impl ConfigurationWarning {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::RelayVersionMismatch { .. } => "relay_version_mismatch",
			Self::PkceUnavailable { .. } => "pkce_unavailable",
			Self::ProofOfPossessionUnavailable => "pop_unavailable",
		}
	}
}
impl Display for ConfigurationWarning {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::RelayVersionMismatch { worker, script } => write!(
				f,
				"Relay version is {worker} and script version is {script}; update the relay, it may not work properly."
			),
			Self::PkceUnavailable { reason } =>
				write!(f, "Unable to generate PKCE challenge, not using PKCE: {reason}."),
			Self::ProofOfPossessionUnavailable => f.write_str(
				"Proof-of-possession requested without a DPoP proof generator; falling back to bearer.",
			),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_transient_errors_report_transient() {
		let transient: Error = TransientError::Timeout {
			endpoint: "https://idp.example.com/token".into(),
			timeout: Duration::seconds(10),
		}
		.into();
		let state: Error = StateError::MissingAuthorizationState.into();

		assert!(transient.is_transient());
		assert!(!state.is_transient());
	}

	#[test]
	fn warnings_expose_stable_kinds() {
		let warning = ConfigurationWarning::RelayVersionMismatch {
			worker: "1.0.0".into(),
			script: "0.9.0".into(),
		};

		assert_eq!(warning.kind(), "relay_version_mismatch");
		assert!(warning.to_string().contains("1.0.0"));
	}
}
