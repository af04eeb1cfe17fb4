// self
use crate::{
	error::ConfigurationWarning,
	obs::{FlowKind, FlowOutcome},
};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"oidc_relay_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Logs a configuration warning and counts it (when the respective features are enabled).
pub fn record_warning(warning: &ConfigurationWarning) {
	crate::obs::log_warning(warning);

	#[cfg(feature = "metrics")]
	{
		metrics::counter!("oidc_relay_warning_total", "kind" => warning.kind()).increment(1);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_are_noops_without_backends() {
		record_flow_outcome(FlowKind::AuthorizationCode, FlowOutcome::Failure);
		record_warning(&ConfigurationWarning::ProofOfPossessionUnavailable);
	}
}
