// self
use crate::{_prelude::*, error::ConfigurationWarning, obs::FlowKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by engine flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("oidc_relay.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> FlowSpanGuard {
		#[cfg(feature = "tracing")]
		{
			FlowSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			FlowSpanGuard {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// RAII guard returned by [`FlowSpan::entered`].
pub struct FlowSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for FlowSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FlowSpanGuard(..)")
	}
}

/// Emits a warn-level event for a degraded-mode condition.
pub fn log_warning(warning: &ConfigurationWarning) {
	#[cfg(feature = "tracing")]
	tracing::warn!(kind = warning.kind(), "{warning}");

	#[cfg(not(feature = "tracing"))]
	let _ = warning;
}

/// Emits a debug-level event before a transient failure is retried.
pub fn log_retry(endpoint: &str, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::debug!(endpoint, %error, "retrying after transient failure");

	#[cfg(not(feature = "tracing"))]
	let _ = (endpoint, error);
}

/// Emits a warn-level event for a failure the flow continues past.
pub fn log_ignored_failure(operation: &'static str, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(operation, %error, "continuing after failure");

	#[cfg(not(feature = "tracing"))]
	let _ = (operation, error);
}

/// Emits a debug-level event for a relay control message or interception step.
pub fn log_relay_event(event: &'static str, detail: &str) {
	#[cfg(feature = "tracing")]
	tracing::debug!(event, detail, "relay event");

	#[cfg(not(feature = "tracing"))]
	let _ = (event, detail);
}
