//! Optional observability helpers for engine flows and the relay.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oidc_relay.flow` with the `flow` and
//!   `stage` (call site) fields, plus warn/debug events for degraded modes and retries.
//! - Enable `metrics` to increment the `oidc_relay_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`, and `oidc_relay_warning_total`
//!   labeled by `kind`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization redirect + callback code exchange.
	AuthorizationCode,
	/// Refresh token grant.
	Refresh,
	/// Silent renewal round trip.
	SilentRenew,
	/// Token revocation during logout.
	Revocation,
	/// Discovery document fetch.
	Discovery,
	/// Relay interception pipeline.
	Relay,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::Refresh => "refresh",
			FlowKind::SilentRenew => "silent_renew",
			FlowKind::Revocation => "revocation",
			FlowKind::Discovery => "discovery",
			FlowKind::Relay => "relay",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an engine operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the terminal outcome of `result` for `kind`.
pub fn record_result<T, E>(kind: FlowKind, result: &Result<T, E>) {
	match result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(_) => record_flow_outcome(kind, FlowOutcome::Failure),
	}
}
