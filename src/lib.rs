//! OpenID Connect authorization-code + PKCE engine paired with a token-hiding network relay.
//!
//! The page-side [`flows::OidcClient`] drives discovery, PKCE redirects, code exchange,
//! validation, and single-flight renewal. The [`relay`] worker runs in its own task, attaches
//! real credentials to requests bound for trusted origins, and launders token-endpoint
//! responses so callers only ever observe placeholder strings.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod pkce;
pub mod relay;
pub mod store;
pub mod validation;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by unit and integration tests.

	pub use crate::_prelude::*;

	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use crate::{
		auth::{ClientId, ScopeSet},
		config::OidcClientConfig,
		flows::OidcClient,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		store::{MemoryStorage, StorageBackend},
	};

	/// Client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestClient = OidcClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds the reqwest transport used against `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		ReqwestHttpClient::new().expect("Failed to build Reqwest client for tests.")
	}

	/// Builds a client configuration pointing at a mock issuer.
	pub fn test_config(authority: &str, client_id: &str) -> OidcClientConfig {
		OidcClientConfig::builder(
			ClientId::new(client_id).expect("Failed to build client identifier for tests."),
			Url::parse(authority).expect("Failed to parse mock authority URL."),
			Url::parse("https://app.example.com/callback")
				.expect("Failed to parse redirect URI fixture."),
		)
		.scope(ScopeSet::new(["openid", "profile"]).expect("Failed to build scope fixture."))
		.build()
		.expect("Failed to build client configuration for tests.")
	}

	/// Constructs an [`OidcClient`] backed by in-memory storage and the reqwest transport used
	/// across integration tests.
	pub fn build_reqwest_test_client(
		config: OidcClientConfig,
	) -> (ReqwestTestClient, Arc<MemoryStorage>, Arc<MemoryStorage>) {
		let token_backend = Arc::new(MemoryStorage::default());
		let discovery_backend = Arc::new(MemoryStorage::default());
		let tokens: Arc<dyn StorageBackend> = token_backend.clone();
		let discovery: Arc<dyn StorageBackend> = discovery_backend.clone();
		let client = OidcClient::with_http_client(
			config,
			tokens,
			discovery,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		);

		(client, token_backend, discovery_backend)
	}

	/// Discovery document advertising the usual endpoints below `issuer`.
	pub fn discovery_document(issuer: &str) -> JsonValue {
		let issuer = issuer.trim_end_matches('/');

		serde_json::json!({
			"issuer": issuer,
			"authorization_endpoint": format!("{issuer}/authorize"),
			"token_endpoint": format!("{issuer}/token"),
			"userinfo_endpoint": format!("{issuer}/userinfo"),
			"revocation_endpoint": format!("{issuer}/revoke"),
		})
	}

	/// Unsigned compact JWT carrying `claims`.
	pub fn unsigned_jwt(claims: &JsonValue) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value as JsonValue};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
