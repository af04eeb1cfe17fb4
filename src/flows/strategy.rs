//! Issuer strategy hooks that classify token endpoint refusals and decorate grant requests.
//!
//! Classification decides whether a failed renewal keeps the session or loses it. Hooks work on
//! plain data so strategies stay independent of any HTTP client.

// self
use crate::{_prelude::*, oauth::TokenFailure};

/// Grant kinds issued by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrantKind {
	/// `authorization_code`.
	AuthorizationCode,
	/// `refresh_token`.
	RefreshToken,
}
impl GrantKind {
	/// Returns the OAuth `grant_type` identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}
}

/// Strategy hook that lets issuers decorate requests and classify errors.
pub trait ProviderStrategy: Send + Sync {
	/// Maps a token endpoint refusal into the engine taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds issuer-specific form parameters before dispatching a grant.
	///
	/// The default implementation does nothing.
	fn augment_token_request(&self, _grant: GrantKind, _form: &mut BTreeMap<String, String>) {}
}

/// Canonical error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// The grant (code or refresh token) is invalid, expired, or revoked.
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Requested scopes exceed what the grant covers.
	InsufficientScope,
	/// Failure is temporary.
	Transient,
}
impl ProviderErrorKind {
	/// `true` when the session cannot be renewed anymore.
	pub fn loses_session(self) -> bool {
		matches!(self, Self::InvalidGrant)
	}
}

/// Context passed to strategies when classifying token errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant associated with the failing request.
	pub grant: GrantKind,
	/// HTTP status code returned by the issuer.
	pub http_status: Option<u16>,
	/// Issuer-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Issuer-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
}
impl ProviderErrorContext {
	/// Creates an empty context for `grant`.
	pub fn new(grant: GrantKind) -> Self {
		Self { grant, http_status: None, oauth_error: None, error_description: None }
	}

	/// Builds a context from a structured token failure.
	pub fn from_failure(grant: GrantKind, failure: &TokenFailure) -> Self {
		Self {
			grant,
			http_status: Some(failure.status),
			oauth_error: failure.oauth_error.clone(),
			error_description: failure.error_description.clone(),
		}
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Failure summary for logs and renewal errors.
	pub fn summary(&self) -> String {
		match (&self.oauth_error, &self.error_description, self.http_status) {
			(Some(error), Some(description), _) => format!("{error}: {description}"),
			(Some(error), None, _) => error.clone(),
			(None, Some(description), _) => description.clone(),
			(None, None, Some(status)) => format!("token endpoint answered HTTP {status}"),
			(None, None, None) => "token endpoint refused the request".into(),
		}
	}
}

/// Default strategy applying RFC 6749 heuristics.
///
/// Structured OAuth fields win, then description hints, and finally the HTTP status.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(match_exact_value) {
			return kind;
		}
		if let Some(kind) = classify_description(ctx.error_description.as_deref()) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	if value.eq_ignore_ascii_case("invalid_grant") || value.eq_ignore_ascii_case("access_denied") {
		Some(ProviderErrorKind::InvalidGrant)
	} else if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
	{
		Some(ProviderErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("invalid_scope")
		|| value.eq_ignore_ascii_case("insufficient_scope")
	{
		Some(ProviderErrorKind::InsufficientScope)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
	{
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_description(description: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = description?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") || text.contains("session not active") =>
			Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::InsufficientScope,
		_ => ProviderErrorKind::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn classify(ctx: ProviderErrorContext) -> ProviderErrorKind {
		DefaultProviderStrategy.classify_token_error(&ctx)
	}

	#[test]
	fn oauth_error_codes_take_precedence() {
		let ctx = ProviderErrorContext::new(GrantKind::RefreshToken)
			.with_http_status(503)
			.with_oauth_error("invalid_grant");

		assert_eq!(classify(ctx), ProviderErrorKind::InvalidGrant);
		assert!(ProviderErrorKind::InvalidGrant.loses_session());
		assert!(!ProviderErrorKind::Transient.loses_session());
	}

	#[test]
	fn descriptions_and_statuses_are_fallbacks() {
		let ctx = ProviderErrorContext::new(GrantKind::RefreshToken)
			.with_http_status(500)
			.with_error_description("Session not active");

		assert_eq!(classify(ctx), ProviderErrorKind::InvalidGrant);
		assert_eq!(
			classify(ProviderErrorContext::new(GrantKind::RefreshToken).with_http_status(502)),
			ProviderErrorKind::Transient
		);
		assert_eq!(
			classify(ProviderErrorContext::new(GrantKind::AuthorizationCode).with_http_status(401)),
			ProviderErrorKind::InvalidClient
		);
	}

	#[test]
	fn summaries_prefer_structured_fields() {
		let failure = TokenFailure {
			status: 400,
			oauth_error: Some("invalid_grant".into()),
			error_description: Some("Token is not active".into()),
		};

		assert_eq!(
			ProviderErrorContext::from_failure(GrantKind::RefreshToken, &failure).summary(),
			"invalid_grant: Token is not active"
		);
		assert_eq!(
			ProviderErrorContext::new(GrantKind::RefreshToken).with_http_status(500).summary(),
			"token endpoint answered HTTP 500"
		);
	}
}
