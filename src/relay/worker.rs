//! Relay task, its handle, and the transport adapter that routes engine traffic through it.

// crates.io
use oauth2::{HttpClientError, HttpRequest, HttpResponse};
use tokio::sync::{mpsc, oneshot};
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	error::{ConfigError, ProtocolError, TransientError, TransportError},
	flows::OidcClient,
	http::{self, DpopProofGenerator, HttpFuture, OidcHttpClient},
	oauth::{self, RevocationResult, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	relay::{
		InitPayload, PreparedRequest, RELAY_VERSION, RelayMessage, RelayReply, RelaySessionState,
		intercept,
	},
};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Settings fixed for the lifetime of a relay task.
#[derive(Clone)]
pub struct RelayOptions {
	/// Statically trusted origins; the user-info endpoint is trusted implicitly.
	pub trusted_domains: Vec<Url>,
	/// Proof generator used when the session runs in proof-of-possession mode.
	pub dpop: Option<Arc<dyn DpopProofGenerator>>,
	/// Per-request upstream timeout.
	pub request_timeout: Duration,
	/// Capacity of the event channel.
	pub channel_capacity: usize,
}
impl RelayOptions {
	/// Adds a trusted origin (optionally with a path prefix).
	pub fn trust(mut self, domain: Url) -> Self {
		self.trusted_domains.push(domain);

		self
	}

	/// Installs a DPoP proof generator.
	pub fn with_dpop_generator(mut self, generator: Arc<dyn DpopProofGenerator>) -> Self {
		self.dpop = Some(generator);

		self
	}

	/// Overrides the upstream timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}
}
impl Default for RelayOptions {
	fn default() -> Self {
		Self {
			trusted_domains: Vec::new(),
			dpop: None,
			request_timeout: oauth::DEFAULT_TIMEOUT,
			channel_capacity: DEFAULT_CHANNEL_CAPACITY,
		}
	}
}
impl Debug for RelayOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RelayOptions")
			.field("trusted_domains", &self.trusted_domains)
			.field("dpop_set", &self.dpop.is_some())
			.field("request_timeout", &self.request_timeout)
			.field("channel_capacity", &self.channel_capacity)
			.finish()
	}
}

/// Failures observed by callers that fetch through the relay.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RelayTransportError {
	/// The relay task has stopped.
	#[error("Relay worker is not running.")]
	Disconnected,
	/// The upstream call failed inside the relay.
	#[error("Upstream request failed: {message}.")]
	Upstream {
		/// Failure summary.
		message: String,
		/// Whether the failure may clear up on retry.
		transient: bool,
	},
}
impl RelayTransportError {
	fn upstream(error: &Error) -> Self {
		Self::Upstream {
			message: error.to_string().trim_end_matches('.').to_owned(),
			transient: error.is_transient(),
		}
	}
}

enum RelayEvent {
	Control { message: RelayMessage, reply: oneshot::Sender<RelayReply> },
	Fetch { request: HttpRequest, reply: oneshot::Sender<Result<HttpResponse, RelayTransportError>> },
	Capture { tokens: TokenSet, reply: oneshot::Sender<()> },
}

/// Page-side endpoint of a running relay.
///
/// Cloning is cheap; the relay stops once every handle is dropped.
#[derive(Clone, Debug)]
pub struct RelayHandle {
	sender: mpsc::Sender<RelayEvent>,
}
impl RelayHandle {
	/// Spawns a relay on the current Tokio runtime.
	///
	/// `http` and `mapper` carry the relay's own upstream traffic.
	pub fn spawn<C, M>(
		http: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
		options: RelayOptions,
	) -> Self
	where
		C: ?Sized + OidcHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let (sender, receiver) = mpsc::channel(options.channel_capacity.max(1));
		let worker = RelayWorker {
			http: http.into(),
			mapper: mapper.into(),
			session: RelaySessionState::new(options.trusted_domains),
			dpop: options.dpop,
			timeout: options.request_timeout,
			events: sender.downgrade(),
		};

		tokio::spawn(worker.run(receiver));

		Self { sender }
	}

	/// Sends a control message and waits for its acknowledgment.
	pub async fn send(&self, message: RelayMessage) -> Result<RelayReply> {
		let (reply, acked) = oneshot::channel();

		self.sender
			.send(RelayEvent::Control { message, reply })
			.await
			.map_err(|_| ProtocolError::RelayDisconnected)?;

		acked.await.map_err(|_| ProtocolError::RelayDisconnected.into())
	}

	/// Sends `init`.
	pub async fn init(&self, payload: &InitPayload) -> Result<RelayReply> {
		let message = RelayMessage::init(payload)
			.map_err(|e| TransportError::network("relay:init", e))?;

		self.send(message).await
	}

	/// Sends `clear`.
	pub async fn clear(&self) -> Result<RelayReply> {
		self.send(RelayMessage::clear()).await
	}

	/// Sends `loadItems` and returns the buffered items.
	pub async fn load_items(&self) -> Result<JsonValue> {
		match self.send(RelayMessage::load_items()).await? {
			RelayReply::Items(items) => Ok(items),
			_ => Ok(JsonValue::Array(Vec::new())),
		}
	}

	/// Fetches `request` through the relay.
	pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, RelayTransportError> {
		let (reply, response) = oneshot::channel();

		self.sender
			.send(RelayEvent::Fetch { request, reply })
			.await
			.map_err(|_| RelayTransportError::Disconnected)?;

		response.await.map_err(|_| RelayTransportError::Disconnected)?
	}

	/// `true` once the relay task has stopped.
	pub fn is_closed(&self) -> bool {
		self.sender.is_closed()
	}
}
impl OidcHttpClient for RelayHandle {
	type TransportError = RelayTransportError;

	fn execute(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		Box::pin(async move {
			self.fetch(request).await.map_err(|e| HttpClientError::Reqwest(Box::new(e)))
		})
	}
}

/// Maps relay fetch failures into engine errors.
#[derive(Clone, Debug, Default)]
pub struct RelayTransportErrorMapper;
impl TransportErrorMapper<RelayTransportError> for RelayTransportErrorMapper {
	fn map_transport_error(
		&self,
		endpoint: &str,
		err: HttpClientError<RelayTransportError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => match *inner {
				RelayTransportError::Disconnected => ProtocolError::RelayDisconnected.into(),
				RelayTransportError::Upstream { message, transient: true } =>
					TransientError::Network { endpoint: endpoint.to_owned(), message }.into(),
				e => TransportError::network(endpoint, e).into(),
			},
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) =>
				TransientError::Network { endpoint: endpoint.to_owned(), message }.into(),
			_ => TransientError::Network {
				endpoint: endpoint.to_owned(),
				message: "Unknown relay failure".into(),
			}
			.into(),
		}
	}
}

struct RelayWorker<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http: Arc<C>,
	mapper: Arc<M>,
	session: RelaySessionState,
	dpop: Option<Arc<dyn DpopProofGenerator>>,
	timeout: Duration,
	events: mpsc::WeakSender<RelayEvent>,
}
impl<C, M> RelayWorker<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	async fn run(mut self, mut receiver: mpsc::Receiver<RelayEvent>) {
		while let Some(event) = receiver.recv().await {
			match event {
				RelayEvent::Control { message, reply } => {
					let ack = match message.into_command() {
						Ok(command) => self.session.apply(command),
						Err(e) => RelayReply::Rejected { reason: e.to_string() },
					};
					let _ = reply.send(ack);
				},
				RelayEvent::Fetch { request, reply } => self.dispatch(request, reply),
				RelayEvent::Capture { tokens, reply } => {
					obs::log_relay_event("capture", self.session.configuration_name.as_ref());

					self.session.tokens = Some(tokens);

					let _ = reply.send(());
				},
			}
		}
	}

	// Each upstream call runs on its own task.
	fn dispatch(
		&self,
		request: HttpRequest,
		reply: oneshot::Sender<Result<HttpResponse, RelayTransportError>>,
	) {
		let prepared = match intercept::prepare_request(&self.session, request, self.dpop.as_deref())
		{
			Ok(prepared) => prepared,
			Err(e) => {
				let _ = reply.send(Err(RelayTransportError::upstream(&e)));

				return;
			},
		};
		let http = self.http.clone();
		let mapper = self.mapper.clone();
		let timeout = self.timeout;
		let events = self.events.clone();

		tokio::spawn(async move {
			let result = forward(http.as_ref(), mapper.as_ref(), prepared, timeout, events).await;
			let _ = reply.send(result);
		});
	}
}

async fn forward<C, M>(
	http: &C,
	mapper: &M,
	prepared: PreparedRequest,
	timeout: Duration,
	events: mpsc::WeakSender<RelayEvent>,
) -> Result<HttpResponse, RelayTransportError>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	const KIND: FlowKind = FlowKind::Relay;

	let span = FlowSpan::new(KIND, "forward");

	obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

	let result = span
		.instrument(async {
			let PreparedRequest { request, launder } = prepared;
			let endpoint =
				http::request_url(&request).map_err(|e| RelayTransportError::upstream(&e))?;
			let response = oauth::send_with_timeout(http, mapper, &endpoint, request, timeout)
				.await
				.map_err(|e| RelayTransportError::upstream(&e))?;
			let Some(context) = launder else {
				return Ok(response);
			};
			let (response, captured) =
				intercept::launder_response(response, &context, OffsetDateTime::now_utc());

			// Placeholders reach the page only after the relay holds the real tokens.
			if let Some(tokens) = captured
				&& let Some(events) = events.upgrade()
			{
				let (reply, acked) = oneshot::channel();

				if events.send(RelayEvent::Capture { tokens, reply }).await.is_ok() {
					let _ = acked.await;
				}
			}

			Ok(response)
		})
		.await;

	obs::record_result(KIND, &result);

	result
}

impl<C, M> OidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Configures `relay` with this client's issuer and token-hiding settings.
	pub async fn init_relay(&self, relay: &RelayHandle) -> Result<RelayReply> {
		let server = self.require_server_configuration().await?;
		let config = self.config();

		relay
			.init(&InitPayload {
				script_version: RELAY_VERSION.to_owned(),
				oidc_server_configuration: server,
				configuration_name: config.configuration_name.clone(),
				hide_access_token: config.hide_access_token,
				demonstrating_proof_of_possession: config.demonstrating_proof_of_possession,
			})
			.await
	}

	/// Logs out and then drops the tokens `relay` holds.
	///
	/// Revocation runs first so calls routed through the relay still carry the real tokens.
	pub async fn logout_with_relay(&self, relay: &RelayHandle) -> Result<RevocationResult> {
		let revoked = self.logout().await?;

		relay.clear().await?;

		Ok(revoked)
	}
}
