#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use oidc_relay::{
	_preludet::*,
	auth::ConfigurationName,
	config::OidcClientConfig,
	flows::{OidcClient, SessionStatus},
	http::ReqwestHttpClient,
	oauth::{
		ReqwestTransportErrorMapper,
		oauth2::http::{Method, Request},
	},
	relay::{
		RelayHandle, RelayMessage, RelayOptions, RelayReply, RelayTransportErrorMapper,
		access_token_placeholder, is_placeholder, refresh_token_placeholder,
	},
	store::{MemoryStorage, StorageBackend},
};

const CLIENT_ID: &str = "relayed-spa";

type RelayedClient = OidcClient<RelayHandle, RelayTransportErrorMapper>;

async fn mock_discovery(server: &MockServer) -> httpmock::Mock<'_> {
	let document = discovery_document(&server.base_url());

	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration");
			then.status(200).json_body(document);
		})
		.await
}

fn spawn_relay(server: &MockServer) -> RelayHandle {
	let api = Url::parse(&server.url("/api/")).expect("API prefix should parse.");

	RelayHandle::spawn::<ReqwestHttpClient, ReqwestTransportErrorMapper>(
		test_reqwest_http_client(),
		ReqwestTransportErrorMapper,
		RelayOptions::default().trust(api),
	)
}

fn relayed_client(config: OidcClientConfig, relay: &RelayHandle) -> RelayedClient {
	let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());

	OidcClient::with_http_client(
		config,
		storage.clone(),
		storage,
		relay.clone(),
		RelayTransportErrorMapper,
	)
}

async fn sign_in(client: &RelayedClient, relay: &RelayHandle) {
	assert_eq!(client.init_relay(relay).await.expect("Relay init should succeed."), RelayReply::Ok);

	let redirect = client.login(BTreeMap::new()).await.expect("Login redirect should build.");
	let callback = Url::parse(&format!(
		"https://app.example.com/callback?code=code-1&state={}",
		redirect.state
	))
	.expect("Callback URL should parse.");

	client.login_callback(&callback).await.expect("Relayed login should succeed.");

	assert_eq!(client.status(), SessionStatus::Authenticated);
}

fn get(url: String) -> oidc_relay::oauth::oauth2::HttpRequest {
	Request::builder()
		.method(Method::GET)
		.uri(url)
		.body(Vec::new())
		.expect("Request fixture should build.")
}

#[tokio::test]
async fn page_only_sees_placeholders_while_upstream_sees_real_tokens() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let code_exchange = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "authorization_code");
			then.status(200).json_body(json!({
				"access_token": "access-real",
				"refresh_token": "refresh-real",
				"token_type": "Bearer",
				"expires_in": 600
			}));
		})
		.await;
	let trusted_api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/orders").header("authorization", "Bearer access-real");
			then.status(200).json_body(json!([{ "id": 1 }]));
		})
		.await;
	let access_placeholder = access_token_placeholder(ConfigurationName::DEFAULT);
	let refresh_placeholder = refresh_token_placeholder(ConfigurationName::DEFAULT);
	let untrusted = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/public/feed")
				.header("authorization", format!("Bearer {access_placeholder}"));
			then.status(200).json_body(json!([]));
		})
		.await;
	let relay = spawn_relay(&server);
	let client = relayed_client(test_config(&server.base_url(), CLIENT_ID), &relay);

	sign_in(&client, &relay).await;
	code_exchange.assert_async().await;

	let held = client
		.tokens()
		.expect("Token store should be readable.")
		.expect("Login should store a token set.");

	assert_eq!(held.access_token.expose(), access_placeholder);
	assert_eq!(
		held.refresh_token.as_ref().map(|secret| secret.expose()),
		Some(refresh_placeholder.as_str())
	);
	assert!(is_placeholder(held.access_token.expose()));

	let response = client
		.fetch_with_tokens(get(server.url("/api/orders")))
		.await
		.expect("Trusted call should succeed.");

	assert_eq!(response.status().as_u16(), 200);

	trusted_api.assert_async().await;

	let response = client
		.fetch_with_tokens(get(server.url("/public/feed")))
		.await
		.expect("Untrusted call should succeed.");

	assert_eq!(response.status().as_u16(), 200);

	untrusted.assert_async().await;
}

#[tokio::test]
async fn refresh_through_the_relay_restores_the_real_refresh_token() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _code_exchange = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "authorization_code");
			then.status(200).json_body(json!({
				"access_token": "access-real",
				"refresh_token": "refresh-real",
				"expires_in": 600
			}));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-real");
			then.status(200).json_body(json!({
				"access_token": "access-rotated",
				"refresh_token": "refresh-rotated",
				"expires_in": 600
			}));
		})
		.await;
	let rotated_api = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/me").header("authorization", "Bearer access-rotated");
			then.status(204);
		})
		.await;
	let relay = spawn_relay(&server);
	let client = relayed_client(test_config(&server.base_url(), CLIENT_ID), &relay);

	sign_in(&client, &relay).await;

	let renewed = client.renew_tokens().await.expect("Relayed refresh should succeed.");

	refresh.assert_async().await;

	assert_eq!(
		renewed.access_token.expose(),
		access_token_placeholder(ConfigurationName::DEFAULT)
	);

	client
		.fetch_with_tokens(get(server.url("/api/me")))
		.await
		.expect("Trusted call should succeed.");
	rotated_api.assert_async().await;
}

#[tokio::test]
async fn access_tokens_stay_visible_when_hiding_is_disabled() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _code_exchange = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).json_body(json!({
				"access_token": "access-visible",
				"refresh_token": "refresh-real",
				"expires_in": 600
			}));
		})
		.await;
	let relay = spawn_relay(&server);
	let mut config = test_config(&server.base_url(), CLIENT_ID);

	config.hide_access_token = false;

	let client = relayed_client(config, &relay);

	sign_in(&client, &relay).await;

	let held = client
		.tokens()
		.expect("Token store should be readable.")
		.expect("Login should store a token set.");

	assert_eq!(held.access_token.expose(), "access-visible");
	assert_eq!(
		held.refresh_token.as_ref().map(|secret| secret.expose().to_owned()),
		Some(refresh_token_placeholder(ConfigurationName::DEFAULT))
	);
}

#[tokio::test]
async fn control_messages_manage_items_and_clear_the_session() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _code_exchange = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).json_body(json!({ "access_token": "access-real", "expires_in": 600 }));
		})
		.await;
	let after_clear = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/orders").header_missing("authorization");
			then.status(401);
		})
		.await;
	let relay = spawn_relay(&server);
	let client = relayed_client(test_config(&server.base_url(), CLIENT_ID), &relay);

	sign_in(&client, &relay).await;

	assert_eq!(relay.load_items().await.expect("Items should load."), json!([]));
	assert_eq!(
		relay
			.send(RelayMessage::new("setItems", json!([{ "key": "draft" }])))
			.await
			.expect("Item replacement should be acknowledged."),
		RelayReply::Ok
	);
	assert_eq!(relay.load_items().await.expect("Items should load."), json!([{ "key": "draft" }]));
	assert_eq!(relay.clear().await.expect("Clear should be acknowledged."), RelayReply::Ok);
	assert_eq!(relay.load_items().await.expect("Items should load."), json!([]));

	let response = relay
		.fetch(get(server.url("/api/orders")))
		.await
		.expect("Fetch should reach the API.");

	assert_eq!(response.status().as_u16(), 401);

	after_clear.assert_async().await;

	let reply = relay
		.send(RelayMessage::new("init", json!({ "scriptVersion": 1 })))
		.await
		.expect("Malformed init should still be acknowledged.");

	assert!(matches!(reply, RelayReply::Rejected { .. }));
	assert!(!relay.is_closed());
}

#[tokio::test]
async fn relayed_logout_revokes_real_tokens_and_clears_the_relay() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _code_exchange = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).json_body(json!({
				"access_token": "access-real",
				"refresh_token": "refresh-real",
				"expires_in": 600
			}));
		})
		.await;
	let revoke_access = server
		.mock_async(|when, then| {
			when.method(POST).path("/revoke").form_urlencoded_tuple("token", "access-real");
			then.status(200);
		})
		.await;
	let revoke_refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/revoke").form_urlencoded_tuple("token", "refresh-real");
			then.status(200);
		})
		.await;
	let after_logout = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/orders").header_missing("authorization");
			then.status(401);
		})
		.await;
	let relay = spawn_relay(&server);
	let client = relayed_client(test_config(&server.base_url(), CLIENT_ID), &relay);

	sign_in(&client, &relay).await;

	let result = client.logout_with_relay(&relay).await.expect("Relayed logout should succeed.");

	assert!(result.success);
	assert_eq!(client.status(), SessionStatus::Unauthenticated);

	revoke_access.assert_async().await;
	revoke_refresh.assert_async().await;

	let response = relay
		.fetch(get(server.url("/api/orders")))
		.await
		.expect("Fetch should reach the API.");

	assert_eq!(response.status().as_u16(), 401);

	after_logout.assert_async().await;
}
