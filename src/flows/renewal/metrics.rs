// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for renewal activity.
///
/// `attempts` counts every caller of [`OidcClient::renew_tokens`](crate::flows::OidcClient),
/// while `exchanges` counts the refresh grants that actually reached the token endpoint, so
/// single-flight collapsing shows up as `attempts > exchanges`.
#[derive(Debug, Default)]
pub struct RenewalMetrics {
	attempts: AtomicU64,
	exchanges: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RenewalMetrics {
	/// Returns the total number of renewal requests.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh grants sent to the token endpoint.
	pub fn exchanges(&self) -> u64 {
		self.exchanges.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals that produced a new token set.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed renewals.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_exchange(&self) {
		self.exchanges.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}
