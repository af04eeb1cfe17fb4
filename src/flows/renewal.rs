//! Renewal scheduling with a single in-flight renewal per client.
//!
//! [`OidcClient::renew_tokens`] publishes a pending-result handle before doing any work, so
//! callers that arrive while a renewal is running attach to that handle instead of issuing a
//! second grant. Renewal prefers the `refresh_token` grant and falls back to a host-driven
//! silent round trip bounded by its own timeout. Only a rejected renewal credential loses the
//! session; every other failure leaves the held token set in place.

mod metrics;

pub use metrics::RenewalMetrics;

// std
use std::time::Duration as StdDuration;
// crates.io
use async_lock::OnceCell;
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	error::{ProtocolError, RenewalError, StateError},
	flows::{CallbackParams, GrantKind, OidcClient, ProviderErrorContext, SessionStatus},
	http::OidcHttpClient,
	oauth::{TokenResult, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	validation,
};

const AUTO_RENEW_RETRY_DELAY: StdDuration = StdDuration::from_secs(10);
const SESSION_LOST_ERRORS: [&str; 3] = ["login_required", "interaction_required", "consent_required"];

/// Boxed future returned by [`SilentRenewer::renew`].
pub type SilentFuture<'a> = Pin<Box<dyn Future<Output = Result<Url>> + 'a + Send>>;

/// Host hook that performs a silent (`prompt=none`) authorization round trip.
///
/// Implementations load `authorization_url` in a hidden browsing context and resolve with the
/// callback URL the context lands on. The engine bounds the call with the configured silent
/// renewal timeout.
pub trait SilentRenewer
where
	Self: Send + Sync,
{
	/// Runs the hidden round trip.
	fn renew(&self, authorization_url: Url) -> SilentFuture<'_>;
}

impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Renews the held token set.
	///
	/// Concurrent callers share one renewal and observe the same outcome.
	pub async fn renew_tokens(&self) -> Result<TokenSet, RenewalError> {
		self.renewal_metrics.record_attempt();

		let pending = {
			let mut slot = self.pending_renewal.lock();

			slot.get_or_insert_with(|| Arc::new(OnceCell::new())).clone()
		};
		// The slot is released before the outcome is published so later callers start afresh.
		pending
			.get_or_init(|| async {
				let outcome = self.renew_once().await;

				{
					let mut slot = self.pending_renewal.lock();

					if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &pending)) {
						*slot = None;
					}
				}

				outcome
			})
			.await
			.clone()
	}

	/// Renews when the remaining lifetime is within the configured margin.
	///
	/// Returns `Ok(None)` when no token set is held or renewal is not due yet.
	pub async fn renew_if_due(&self) -> Result<Option<TokenSet>, RenewalError> {
		self.renew_if_due_at(OffsetDateTime::now_utc()).await
	}

	/// [`OidcClient::renew_if_due`] against an explicit instant.
	pub async fn renew_if_due_at(
		&self,
		now: OffsetDateTime,
	) -> Result<Option<TokenSet>, RenewalError> {
		let Some(current) = self.tokens.tokens().map_err(renewal_failure)? else {
			return Ok(None);
		};

		if current.remaining_at(now, self.config.token_renew_mode) > self.config.renewal_margin {
			return Ok(None);
		}

		self.renew_tokens().await.map(Some)
	}

	/// Keeps the session fresh until it ends.
	///
	/// Sleeps until the renewal margin of the held token set is reached, then renews. Returns
	/// `Ok(())` once no token set is held (logout) and the error once the session is lost or
	/// cannot be renewed at all. Other renewal failures are retried after a short delay.
	pub async fn run_auto_renewal(&self) -> Result<(), RenewalError> {
		loop {
			let Some(current) = self.tokens.tokens().map_err(renewal_failure)? else {
				return Ok(());
			};
			let wait = current.remaining_at(OffsetDateTime::now_utc(), self.config.token_renew_mode)
				- self.config.renewal_margin;

			if wait.is_positive() {
				tokio::time::sleep(wait.unsigned_abs()).await;

				continue;
			}

			match self.renew_tokens().await {
				Ok(tokens)
					if tokens.remaining_at(
						OffsetDateTime::now_utc(),
						self.config.token_renew_mode,
					) > self.config.renewal_margin => {},
				Ok(_) => tokio::time::sleep(AUTO_RENEW_RETRY_DELAY).await,
				Err(e @ (RenewalError::SessionLost { .. } | RenewalError::State(_))) =>
					return Err(e),
				Err(_) => tokio::time::sleep(AUTO_RENEW_RETRY_DELAY).await,
			}
		}
	}

	async fn renew_once(&self) -> Result<TokenSet, RenewalError> {
		let previous_status = self.status();

		self.set_status(SessionStatus::Renewing);

		let result = self.renew_held_tokens().await;

		match &result {
			Ok(_) => {
				self.renewal_metrics.record_success();
				self.set_status(SessionStatus::Authenticated);
			},
			Err(RenewalError::SessionLost { .. }) => {
				self.renewal_metrics.record_failure();

				if let Err(e) = self.tokens.clear_tokens() {
					obs::log_ignored_failure("clear_tokens", &e);
				}

				self.set_status(SessionStatus::SessionLost);
			},
			Err(_) => {
				self.renewal_metrics.record_failure();
				self.set_status(previous_status);
			},
		}

		result
	}

	async fn renew_held_tokens(&self) -> Result<TokenSet, RenewalError> {
		let current = self.tokens.tokens().map_err(renewal_failure)?.ok_or(
			StateError::NotAuthenticated { status: SessionStatus::Unauthenticated.as_str() },
		)?;

		if let Some(refresh_token) = &current.refresh_token {
			return self.refresh_grant(&current, refresh_token.expose()).await;
		}
		if let Some(renewer) = &self.silent_renewer {
			return self.silent_renew(renewer.as_ref(), &current).await;
		}

		Err(StateError::NoRenewalCredential.into())
	}

	async fn refresh_grant(
		&self,
		current: &TokenSet,
		refresh_token: &str,
	) -> Result<TokenSet, RenewalError> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh_grant");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let server = self.require_server_configuration().await.map_err(renewal_failure)?;
				let mut extras = self.config.token_request_extras.clone();

				self.strategy.augment_token_request(GrantKind::RefreshToken, &mut extras);
				self.renewal_metrics.record_exchange();

				let result = self
					.token_client
					.refresh_tokens(
						&server.token_endpoint,
						refresh_token,
						&self.config.client_id,
						&extras,
						Some(current),
						self.config.token_renew_mode,
					)
					.await
					.map_err(renewal_failure)?;
				let tokens = match result {
					TokenResult::Success { tokens, .. } => tokens,
					TokenResult::Failure(failure) => {
						let ctx = ProviderErrorContext::from_failure(GrantKind::RefreshToken, &failure);

						return Err(if self.strategy.classify_token_error(&ctx).loses_session() {
							RenewalError::SessionLost { reason: ctx.summary() }
						} else {
							RenewalError::Failed { reason: ctx.summary(), status: Some(failure.status) }
						});
					},
				};
				let verdict = validation::validate_against_server_with(
					&tokens,
					None,
					&server,
					self.config.nonce_policy,
					OffsetDateTime::now_utc(),
				);

				if !verdict.is_valid {
					return Err(RenewalError::Failed { reason: verdict.reason, status: None });
				}

				self.tokens.save_tokens(&tokens).map_err(renewal_failure)?;

				Ok(tokens)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}

	async fn silent_renew(
		&self,
		renewer: &dyn SilentRenewer,
		current: &TokenSet,
	) -> Result<TokenSet, RenewalError> {
		const KIND: FlowKind = FlowKind::SilentRenew;

		let span = FlowSpan::new(KIND, "silent_renew");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let server = self.require_server_configuration().await.map_err(renewal_failure)?;
				let redirect_uri =
					self.config.silent_redirect_uri.as_ref().unwrap_or(&self.config.redirect_uri);
				let extras = BTreeMap::from([("prompt".to_owned(), "none".to_owned())]);
				let redirect = self
					.authorization_redirect(&server, redirect_uri, &extras)
					.map_err(renewal_failure)?;
				let timeout = self.config.silent_renew_timeout;
				let callback =
					match tokio::time::timeout(timeout.unsigned_abs(), renewer.renew(redirect.url))
						.await
					{
						Ok(callback) => callback.map_err(renewal_failure)?,
						Err(_) => {
							if let Err(e) = self.tokens.discard_authorization_state() {
								obs::log_ignored_failure("discard_authorization_state", &e);
							}

							return Err(RenewalError::SilentTimeout(timeout));
						},
					};
				let params = CallbackParams::parse(&callback, self.config.query_mode);

				self.complete_authorization(params, redirect_uri, Some(current)).await.map_err(
					|e| match e {
						Error::Protocol(ProtocolError::AuthorizationDenied { error, .. })
							if SESSION_LOST_ERRORS.contains(&error.as_str()) =>
							RenewalError::SessionLost { reason: error },
						e => renewal_failure(e),
					},
				)
			})
			.await;

		obs::record_result(KIND, &result);

		result
	}
}

fn renewal_failure(e: Error) -> RenewalError {
	match e {
		Error::Renewal(e) => e,
		Error::State(e) => RenewalError::State(e),
		e => RenewalError::Failed {
			reason: e.to_string().trim_end_matches('.').to_owned(),
			status: None,
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::TransientError;

	#[test]
	fn renewal_failures_keep_state_errors_typed() {
		assert_eq!(
			renewal_failure(StateError::NoRenewalCredential.into()),
			RenewalError::State(StateError::NoRenewalCredential)
		);

		let failure = renewal_failure(
			TransientError::Network {
				endpoint: "https://idp.example.com/token".into(),
				message: "connection reset".into(),
			}
			.into(),
		);

		assert_eq!(
			failure,
			RenewalError::Failed {
				reason: "Network request to https://idp.example.com/token failed: connection reset"
					.into(),
				status: None,
			}
		);
	}

	#[test]
	fn metrics_track_exchanges_separately() {
		let metrics = RenewalMetrics::default();

		metrics.record_attempt();
		metrics.record_attempt();
		metrics.record_exchange();
		metrics.record_success();

		assert_eq!(metrics.attempts(), 2);
		assert_eq!(metrics.exchanges(), 1);
		assert_eq!(metrics.successes(), 1);
		assert_eq!(metrics.failures(), 0);
	}
}
