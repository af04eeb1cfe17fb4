//! Normalized token set, its lifecycle helpers, and the wire response it is built from.

// self
use crate::{
	_prelude::*,
	auth::{Claims, TokenSecret},
	config::TokenRenewMode,
	error::ConfigError,
};

/// Token type assumed when the endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Current lifecycle status for a token set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token is currently valid.
	Active,
	/// Token reached its expiry instant.
	Expired,
}

/// Errors produced by [`TokenSetBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenSetBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when `issued_at + expires_in` leaves the representable range.
	#[error("Expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Immutable token set owned by the token store.
///
/// `expires_at` is computed once at ingestion (`issued_at + expires_in`) and never
/// recomputed. Renewals replace the whole value. Both instants carry whole seconds, the
/// precision they are persisted with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
	/// Access token; a relay placeholder when the relay hides tokens.
	pub access_token: TokenSecret,
	/// Raw id token (JWT), when issued.
	pub id_token: Option<String>,
	/// Refresh token, when issued.
	pub refresh_token: Option<TokenSecret>,
	/// Token type announced by the endpoint.
	pub token_type: String,
	/// Scope string echoed by the endpoint, when present.
	pub scope: Option<String>,
	/// Issued-at instant.
	#[serde(with = "time::serde::timestamp")]
	pub issued_at: OffsetDateTime,
	/// Expiry instant.
	#[serde(with = "time::serde::timestamp")]
	pub expires_at: OffsetDateTime,
}
impl TokenSet {
	/// Returns a builder.
	pub fn builder() -> TokenSetBuilder {
		TokenSetBuilder::default()
	}

	/// Normalizes a grant response, inheriting fields the response omits from `previous`.
	///
	/// `issued_at`/`expires_in` may be numbers or numeric strings. When `expires_in` is
	/// missing, the id token `exp` claim supplies the expiry.
	pub fn from_response(
		response: &TokenResponse,
		previous: Option<&TokenSet>,
		now: OffsetDateTime,
	) -> Result<Self> {
		let issued_at = match &response.issued_at {
			Some(raw) => OffsetDateTime::from_unix_timestamp(raw.as_seconds()?)
				.map_err(|_| ConfigError::InvalidExpiresIn { value: raw.to_string() })?,
			None => whole_seconds(now),
		};
		let id_token =
			response.id_token.clone().or_else(|| previous.and_then(|p| p.id_token.clone()));
		let expires_in = match &response.expires_in {
			Some(raw) => Duration::seconds(raw.as_seconds()?),
			None => id_token
				.as_deref()
				.and_then(Claims::from_jwt)
				.and_then(|claims| claims.expires_at())
				.map(|exp| exp - issued_at)
				.ok_or(ConfigError::MissingExpiresIn)?,
		};

		if !expires_in.is_positive() {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		let expires_at = issued_at.checked_add(expires_in).ok_or_else(|| {
			ConfigError::InvalidExpiresIn {
				value: response
					.expires_in
					.as_ref()
					.map_or_else(|| expires_in.whole_seconds().to_string(), ToString::to_string),
			}
		})?;
		let mut builder = TokenSet::builder()
			.access_token(response.access_token.clone())
			.token_type(response.token_type.clone().unwrap_or_else(|| DEFAULT_TOKEN_TYPE.into()))
			.issued_at(issued_at)
			.expires_at(expires_at);

		match (&response.refresh_token, previous.and_then(|p| p.refresh_token.as_ref())) {
			(Some(fresh), _) => builder = builder.refresh_token(fresh.clone()),
			(None, Some(kept)) => builder = builder.refresh_token(kept.expose()),
			(None, None) => {},
		}

		if let Some(id_token) = id_token {
			builder = builder.id_token(id_token);
		}
		if let Some(scope) = &response.scope {
			builder = builder.scope(scope.clone());
		}

		builder.build().map_err(|e| ConfigError::from(e).into())
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the set has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Decoded id token payload, if an id token is present and well-formed.
	pub fn id_token_claims(&self) -> Option<Claims> {
		self.id_token.as_deref().and_then(Claims::from_jwt)
	}

	/// Instant the renewal scheduler treats as the end of the session's usable lifetime.
	pub fn renewal_deadline(&self, mode: TokenRenewMode) -> OffsetDateTime {
		let id_expiry = self.id_token_claims().and_then(|claims| claims.expires_at());

		match (mode, id_expiry) {
			(TokenRenewMode::AccessTokenInvalid, _) | (_, None) => self.expires_at,
			(TokenRenewMode::IdTokenInvalid, Some(exp)) => exp,
			(TokenRenewMode::AccessTokenOrIdTokenInvalid, Some(exp)) => exp.min(self.expires_at),
		}
	}

	/// Lifetime left before the renewal deadline.
	pub fn remaining_at(&self, now: OffsetDateTime, mode: TokenRenewMode) -> Duration {
		self.renewal_deadline(mode) - now
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("access_token", &"<redacted>")
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("scope", &self.scope)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`TokenSet`].
#[derive(Clone, Debug, Default)]
pub struct TokenSetBuilder {
	access_token: Option<TokenSecret>,
	id_token: Option<String>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	scope: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenSetBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the raw id token.
	pub fn id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(token.into());

		self
	}

	/// Overrides the token type (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Records the granted scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`TokenSet`].
	pub fn build(self) -> Result<TokenSet, TokenSetBuilderError> {
		let access_token = self.access_token.ok_or(TokenSetBuilderError::MissingAccessToken)?;
		let issued_at = whole_seconds(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc));
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(TokenSetBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokenSetBuilderError::MissingExpiry),
		};
		let expires_at = whole_seconds(expires_at);

		Ok(TokenSet {
			access_token,
			id_token: self.id_token,
			refresh_token: self.refresh_token,
			token_type: self.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.into()),
			scope: self.scope,
			issued_at,
			expires_at,
		})
	}
}

/// Drops the sub-second part of `instant`.
pub fn whole_seconds(instant: OffsetDateTime) -> OffsetDateTime {
	instant.replace_nanosecond(0).unwrap_or(instant)
}

/// JSON number or numeric string, as issuers and relays send `expires_in`/`issued_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexibleNumber {
	/// Plain JSON number.
	Number(serde_json::Number),
	/// Numeric string.
	Text(String),
}
impl FlexibleNumber {
	/// Whole seconds represented by the value; fractional values are truncated.
	pub fn as_seconds(&self) -> Result<i64, ConfigError> {
		let parsed = match self {
			Self::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
			Self::Text(s) => s
				.trim()
				.parse::<i64>()
				.ok()
				.or_else(|| s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64)),
		};

		parsed.ok_or_else(|| ConfigError::InvalidExpiresIn { value: self.to_string() })
	}
}
impl Display for FlexibleNumber {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Number(n) => Display::fmt(n, f),
			Self::Text(s) => f.write_str(s),
		}
	}
}

/// Token endpoint success body.
///
/// Unknown members are kept in `extra` so relays can re-serialize the document untouched
/// apart from the fields they rewrite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Access token.
	pub access_token: String,
	/// Token type.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_type: Option<String>,
	/// Lifetime in seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_in: Option<FlexibleNumber>,
	/// Issue instant in unix seconds (non-standard; set by some issuers and relays).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issued_at: Option<FlexibleNumber>,
	/// Refresh token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	/// Id token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
	/// Granted scope.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	/// Remaining members.
	#[serde(flatten)]
	pub extra: JsonMap<String, JsonValue>,
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn response(json: &str) -> TokenResponse {
		serde_json::from_str(json).expect("Token response fixture should deserialize.")
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let set = TokenSet::builder()
			.access_token("access")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Token set builder should succeed.");

		assert_eq!(set.status_at(macros::datetime!(2024-12-31 23:59 UTC)), TokenStatus::Pending);
		assert_eq!(set.status_at(macros::datetime!(2025-01-01 00:30 UTC)), TokenStatus::Active);
		assert_eq!(set.status_at(macros::datetime!(2025-01-01 01:00 UTC)), TokenStatus::Expired);
	}

	#[test]
	fn expiry_is_issued_at_plus_expires_in() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let set = TokenSet::from_response(
			&response("{\"access_token\":\"a\",\"token_type\":\"Bearer\",\"expires_in\":\"300\"}"),
			None,
			now,
		)
		.expect("String expires_in should normalize.");

		assert_eq!(set.issued_at, now);
		assert_eq!(set.expires_at, macros::datetime!(2025-01-01 00:05 UTC));
	}

	#[test]
	fn response_inherits_omitted_fields_from_previous() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let previous = TokenSet::builder()
			.access_token("old-access")
			.refresh_token("kept-refresh")
			.id_token("h.p.s")
			.issued_at(now - Duration::hours(1))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Previous token set should build.");
		let set = TokenSet::from_response(
			&response("{\"access_token\":\"new-access\",\"expires_in\":60}"),
			Some(&previous),
			now,
		)
		.expect("Refresh response should normalize.");

		assert_eq!(set.access_token.expose(), "new-access");
		assert_eq!(set.refresh_token.as_ref().map(TokenSecret::expose), Some("kept-refresh"));
		assert_eq!(set.id_token.as_deref(), Some("h.p.s"));
		assert_eq!(set.token_type, DEFAULT_TOKEN_TYPE);
	}

	#[test]
	fn missing_expires_in_falls_back_to_id_token_exp() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let payload = Claims::decode_segment(
			&base64::Engine::encode(
				&base64::engine::general_purpose::URL_SAFE_NO_PAD,
				format!("{{\"exp\":{}}}", (now + Duration::minutes(10)).unix_timestamp()),
			),
		)
		.expect("Claims fixture should decode.");
		let id_token = format!("h.{}.s", payload.encode_segment());
		let body = format!("{{\"access_token\":\"a\",\"id_token\":\"{id_token}\"}}");
		let set = TokenSet::from_response(&response(&body), None, now)
			.expect("Id token expiry should be used.");

		assert_eq!(set.expires_at, now + Duration::minutes(10));
		assert!(matches!(
			TokenSet::from_response(&response("{\"access_token\":\"a\"}"), None, now),
			Err(Error::Config(ConfigError::MissingExpiresIn))
		));
	}

	#[test]
	fn renewal_deadline_respects_mode() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let claims = Claims::decode_segment(&base64::Engine::encode(
			&base64::engine::general_purpose::URL_SAFE_NO_PAD,
			format!("{{\"exp\":{}}}", (now + Duration::minutes(5)).unix_timestamp()),
		))
		.expect("Claims fixture should decode.");
		let set = TokenSet::builder()
			.access_token("a")
			.id_token(format!("h.{}.s", claims.encode_segment()))
			.issued_at(now)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token set should build.");

		assert_eq!(
			set.renewal_deadline(TokenRenewMode::AccessTokenOrIdTokenInvalid),
			now + Duration::minutes(5)
		);
		assert_eq!(set.renewal_deadline(TokenRenewMode::AccessTokenInvalid), set.expires_at);
		assert_eq!(
			set.renewal_deadline(TokenRenewMode::IdTokenInvalid),
			now + Duration::minutes(5)
		);
	}

	#[test]
	fn oversized_lifetimes_are_rejected() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		for body in [
			"{\"access_token\":\"a\",\"expires_in\":9223372036854775807}",
			"{\"access_token\":\"a\",\"expires_in\":1e300}",
			"{\"access_token\":\"a\",\"expires_in\":\"9223372036854775807\"}",
		] {
			assert!(matches!(
				TokenSet::from_response(&response(body), None, now),
				Err(Error::Config(ConfigError::InvalidExpiresIn { .. }))
			));
		}

		assert_eq!(
			TokenSet::builder().access_token("a").issued_at(now).expires_in(Duration::MAX).build(),
			Err(TokenSetBuilderError::ExpiryOutOfRange)
		);
	}

	#[test]
	fn instants_are_kept_at_whole_seconds() {
		let now = macros::datetime!(2025-01-01 00:00:00.750 UTC);
		let set = TokenSet::from_response(
			&response("{\"access_token\":\"a\",\"expires_in\":60}"),
			None,
			now,
		)
		.expect("Token response should normalize.");

		assert_eq!(set.issued_at, macros::datetime!(2025-01-01 00:00 UTC));
		assert_eq!(set.expires_at, macros::datetime!(2025-01-01 00:01 UTC));

		let stored: TokenSet = serde_json::from_str(
			&serde_json::to_string(&set).expect("Token set should serialize."),
		)
		.expect("Token set should deserialize.");

		assert_eq!(stored, set);

		let built = TokenSet::builder()
			.access_token("a")
			.expires_in(Duration::minutes(1))
			.build()
			.expect("Token set should build.");

		assert_eq!(built.issued_at.nanosecond(), 0);
		assert_eq!(built.expires_at.nanosecond(), 0);
	}

	#[test]
	fn debug_redacts_secrets() {
		let set = TokenSet::builder()
			.access_token("very-secret")
			.refresh_token("also-secret")
			.expires_in(Duration::minutes(1))
			.build()
			.expect("Token set should build.");
		let rendered = format!("{set:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(!rendered.contains("also-secret"));
	}
}
