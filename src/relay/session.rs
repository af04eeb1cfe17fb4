//! Worker-owned session state, mutated only through control commands and token captures.

// self
use crate::{
	_prelude::*,
	auth::{ConfigurationName, TokenSet},
	discovery::ServerConfiguration,
	error::ConfigurationWarning,
	obs,
	relay::{InitPayload, RELAY_VERSION, RelayCommand, RelayReply},
};

/// Everything the relay knows about the session it guards.
///
/// Starts empty, is configured by `init`, and is emptied by `clear`. It lives only as long as
/// the worker task.
#[derive(Clone, PartialEq)]
pub struct RelaySessionState {
	/// Real token set captured from the token endpoint.
	pub tokens: Option<TokenSet>,
	/// Opaque item list buffered for the page.
	pub items: JsonValue,
	/// Discovery document supplied by `init`.
	pub server_configuration: Option<ServerConfiguration>,
	/// Configuration whose placeholders are issued.
	pub configuration_name: ConfigurationName,
	/// Whether access tokens are replaced by placeholders.
	pub hide_access_token: bool,
	/// Whether outbound credentials use the `PoP` scheme.
	pub demonstrating_proof_of_possession: bool,
	/// Statically trusted origins (with optional path prefixes).
	pub trusted_domains: Vec<Url>,
}
impl RelaySessionState {
	/// Creates an empty session trusting `trusted_domains`.
	pub fn new(trusted_domains: Vec<Url>) -> Self {
		Self {
			tokens: None,
			items: empty_items(),
			server_configuration: None,
			configuration_name: ConfigurationName::default(),
			hide_access_token: true,
			demonstrating_proof_of_possession: false,
			trusted_domains,
		}
	}

	/// Applies a control command and returns its acknowledgment.
	pub fn apply(&mut self, command: RelayCommand) -> RelayReply {
		match command {
			RelayCommand::Init(payload) => {
				self.init(*payload);

				RelayReply::Ok
			},
			RelayCommand::Clear => {
				obs::log_relay_event("clear", self.configuration_name.as_ref());

				self.tokens = None;
				self.items = empty_items();

				RelayReply::Ok
			},
			RelayCommand::LoadItems => RelayReply::Items(self.items.clone()),
			RelayCommand::ReplaceItems(items) => {
				self.items = items;

				RelayReply::Ok
			},
		}
	}

	/// `true` when `url` is covered by a trusted domain or is the user-info endpoint.
	///
	/// Scheme, host, and port must match; a trusted URL with a path additionally requires the
	/// request path to start with it.
	pub fn is_trusted(&self, url: &Url) -> bool {
		let userinfo =
			self.server_configuration.as_ref().and_then(|config| config.userinfo_endpoint.as_ref());

		self.trusted_domains.iter().chain(userinfo).any(|trusted| covers(trusted, url))
	}

	/// `true` when `url` is the configured token endpoint.
	pub fn is_token_endpoint(&self, url: &Url) -> bool {
		self.server_configuration
			.as_ref()
			.is_some_and(|config| same_endpoint(&config.token_endpoint, url))
	}

	/// `true` when `url` is the configured revocation endpoint.
	pub fn is_revocation_endpoint(&self, url: &Url) -> bool {
		self.server_configuration
			.as_ref()
			.and_then(|config| config.revocation_endpoint.as_ref())
			.is_some_and(|endpoint| same_endpoint(endpoint, url))
	}

	fn init(&mut self, payload: InitPayload) {
		if payload.script_version != RELAY_VERSION {
			obs::record_warning(&ConfigurationWarning::RelayVersionMismatch {
				worker: RELAY_VERSION.to_owned(),
				script: payload.script_version.clone(),
			});
		}

		obs::log_relay_event("init", payload.configuration_name.as_ref());

		self.server_configuration = Some(payload.oidc_server_configuration);
		self.configuration_name = payload.configuration_name;
		self.hide_access_token = payload.hide_access_token;
		self.demonstrating_proof_of_possession = payload.demonstrating_proof_of_possession;
	}
}
impl Debug for RelaySessionState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RelaySessionState")
			.field("tokens_held", &self.tokens.is_some())
			.field("configuration_name", &self.configuration_name)
			.field("hide_access_token", &self.hide_access_token)
			.field("trusted_domains", &self.trusted_domains)
			.finish()
	}
}

fn empty_items() -> JsonValue {
	JsonValue::Array(Vec::new())
}

fn same_origin(a: &Url, b: &Url) -> bool {
	a.scheme() == b.scheme()
		&& a.host_str() == b.host_str()
		&& a.port_or_known_default() == b.port_or_known_default()
}

fn covers(trusted: &Url, url: &Url) -> bool {
	let prefix = trusted.path();

	same_origin(trusted, url)
		&& (url.path().starts_with(prefix) || url.path() == prefix.trim_end_matches('/'))
}

fn same_endpoint(endpoint: &Url, url: &Url) -> bool {
	same_origin(endpoint, url) && endpoint.path() == url.path()
}
