//! Relay control-channel protocol.

// self
use crate::{_prelude::*, auth::ConfigurationName, discovery::ServerConfiguration};

const INIT: &str = "init";
const CLEAR: &str = "clear";
const LOAD_ITEMS: &str = "loadItems";

/// Wire form of a control message: a `{type, data}` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
	/// Message kind.
	#[serde(rename = "type")]
	pub kind: String,
	/// Kind-specific payload.
	#[serde(default)]
	pub data: JsonValue,
}
impl RelayMessage {
	/// Creates a message of an arbitrary kind.
	pub fn new(kind: impl Into<String>, data: JsonValue) -> Self {
		Self { kind: kind.into(), data }
	}

	/// `init` message carrying `payload`.
	pub fn init(payload: &InitPayload) -> Result<Self, RelayMessageError> {
		let data = serde_json::to_value(payload)
			.map_err(|e| RelayMessageError::Encode { message: e.to_string() })?;

		Ok(Self::new(INIT, data))
	}

	/// `clear` message.
	pub fn clear() -> Self {
		Self::new(CLEAR, JsonValue::Null)
	}

	/// `loadItems` message.
	pub fn load_items() -> Self {
		Self::new(LOAD_ITEMS, JsonValue::Null)
	}

	/// Parses the message into a typed command.
	///
	/// Kinds other than `init`, `clear`, and `loadItems` replace the buffered items.
	pub fn into_command(self) -> Result<RelayCommand, RelayMessageError> {
		match self.kind.as_str() {
			INIT => {
				let payload = serde_path_to_error::deserialize(self.data)
					.map_err(|e| RelayMessageError::InvalidInit { message: e.to_string() })?;

				Ok(RelayCommand::Init(Box::new(payload)))
			},
			CLEAR => Ok(RelayCommand::Clear),
			LOAD_ITEMS => Ok(RelayCommand::LoadItems),
			_ => Ok(RelayCommand::ReplaceItems(self.data)),
		}
	}
}

/// Typed control command.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayCommand {
	/// Configure the session.
	Init(Box<InitPayload>),
	/// Drop the held token set and items.
	Clear,
	/// Return the buffered items.
	LoadItems,
	/// Store the payload verbatim as the buffered items.
	ReplaceItems(JsonValue),
}

/// Payload of an `init` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
	/// Protocol version compiled into the page-side engine.
	pub script_version: String,
	/// Discovery document of the issuer.
	pub oidc_server_configuration: ServerConfiguration,
	/// Configuration whose tokens the relay guards.
	#[serde(default)]
	pub configuration_name: ConfigurationName,
	/// Whether access tokens are replaced by placeholders.
	#[serde(default = "default_hide_access_token")]
	pub hide_access_token: bool,
	/// Whether outbound credentials use the `PoP` scheme with a `DPoP` proof.
	#[serde(default)]
	pub demonstrating_proof_of_possession: bool,
}

fn default_hide_access_token() -> bool {
	true
}

/// Acknowledgment returned for every control message.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayReply {
	/// Command applied.
	Ok,
	/// Buffered items.
	Items(JsonValue),
	/// Command could not be parsed.
	Rejected {
		/// Parse failure summary.
		reason: String,
	},
}
impl RelayReply {
	/// Wire form of the reply: `"ok"`, the item list, or `{"error": reason}`.
	pub fn to_json(&self) -> JsonValue {
		match self {
			Self::Ok => JsonValue::String("ok".into()),
			Self::Items(items) => items.clone(),
			Self::Rejected { reason } => serde_json::json!({ "error": reason }),
		}
	}
}

/// Control message encoding or decoding failure.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RelayMessageError {
	/// The `init` payload does not match the expected shape.
	#[error("Init payload is invalid: {message}.")]
	InvalidInit {
		/// Structured parsing failure.
		message: String,
	},
	/// A payload could not be encoded.
	#[error("Relay message could not be encoded: {message}.")]
	Encode {
		/// Encoder failure.
		message: String,
	},
}
