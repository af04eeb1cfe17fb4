//! Token store: the current token set plus the pending authorization state, per configuration.

// self
use crate::{
	_prelude::*,
	auth::{ConfigurationName, TokenSet},
	error::StateError,
	store::StorageBackend,
};

const INTERNAL_KEY: &str = "oidc:internal";
const TOKENS_KEY: &str = "oidc:tokens";

/// Pending authorization round trip, persisted when the redirect is issued and consumed once.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
	/// PKCE verifier; absent when the challenge could not be derived.
	pub code_verifier: Option<String>,
	/// Opaque `state` value echoed by the callback.
	pub state: String,
	/// Nonce the id token is expected to carry.
	pub nonce: String,
}
impl Debug for AuthorizationState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationState")
			.field("code_verifier", &self.code_verifier.as_ref().map(|_| "<redacted>"))
			.field("state", &self.state)
			.field("nonce", &self.nonce)
			.finish()
	}
}

/// Owns the token set and authorization state of one client configuration.
///
/// Token sets are only ever replaced whole. Keys for the default configuration are
/// `oidc:internal` and `oidc:tokens`; other configurations append `:<name>`.
#[derive(Clone)]
pub struct TokenStore {
	backend: Arc<dyn StorageBackend>,
	internal_key: String,
	tokens_key: String,
}
impl TokenStore {
	/// Creates a store scoped to `name` on top of `backend`.
	pub fn new(backend: Arc<dyn StorageBackend>, name: &ConfigurationName) -> Self {
		let scoped = |base: &str| {
			if name.as_ref() == ConfigurationName::DEFAULT {
				base.to_owned()
			} else {
				format!("{base}:{name}")
			}
		};

		Self { internal_key: scoped(INTERNAL_KEY), tokens_key: scoped(TOKENS_KEY), backend }
	}

	/// Storage key holding the pending authorization state.
	pub fn internal_key(&self) -> &str {
		&self.internal_key
	}

	/// Storage key holding the token set.
	pub fn tokens_key(&self) -> &str {
		&self.tokens_key
	}

	/// Persists a fresh authorization state, overwriting any prior one.
	pub fn save_authorization_state(&self, state: &AuthorizationState) -> Result<()> {
		self.backend.set_json(&self.internal_key, state)?;

		Ok(())
	}

	/// Removes and returns the pending authorization state.
	///
	/// A second call observes [`StateError::MissingAuthorizationState`].
	pub fn take_authorization_state(&self) -> Result<AuthorizationState> {
		let state = self
			.backend
			.get_json::<AuthorizationState>(&self.internal_key)?
			.ok_or(StateError::MissingAuthorizationState)?;

		self.backend.remove_item(&self.internal_key)?;

		Ok(state)
	}

	/// Drops the pending authorization state, if any.
	pub fn discard_authorization_state(&self) -> Result<()> {
		self.backend.remove_item(&self.internal_key)?;

		Ok(())
	}

	/// Returns `true` while an authorization round trip is pending.
	pub fn has_authorization_state(&self) -> Result<bool> {
		Ok(self.backend.get_item(&self.internal_key)?.is_some())
	}

	/// Current token set, if any.
	pub fn tokens(&self) -> Result<Option<TokenSet>> {
		Ok(self.backend.get_json(&self.tokens_key)?)
	}

	/// Replaces the token set.
	pub fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
		self.backend.set_json(&self.tokens_key, tokens)?;

		Ok(())
	}

	/// Drops the token set.
	pub fn clear_tokens(&self) -> Result<()> {
		self.backend.remove_item(&self.tokens_key)?;

		Ok(())
	}

	/// Drops both the token set and any pending authorization state.
	pub fn clear(&self) -> Result<()> {
		self.backend.remove_item(&self.internal_key)?;
		self.backend.remove_item(&self.tokens_key)?;

		Ok(())
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore")
			.field("internal_key", &self.internal_key)
			.field("tokens_key", &self.tokens_key)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStorage;

	fn state() -> AuthorizationState {
		AuthorizationState {
			code_verifier: Some("verifier".into()),
			state: "state-1".into(),
			nonce: "nonce-1".into(),
		}
	}

	#[test]
	fn authorization_state_is_consumed_once() {
		let store = TokenStore::new(Arc::new(MemoryStorage::default()), &Default::default());

		store.save_authorization_state(&state()).expect("Saving state should succeed.");

		assert_eq!(store.take_authorization_state().expect("First take should succeed."), state());
		assert!(matches!(
			store.take_authorization_state(),
			Err(Error::State(StateError::MissingAuthorizationState))
		));
	}

	#[test]
	fn non_default_configurations_use_scoped_keys() {
		let backend = Arc::new(MemoryStorage::default());
		let primary = TokenStore::new(backend.clone(), &Default::default());
		let secondary = TokenStore::new(
			backend.clone(),
			&ConfigurationName::new("secondary").expect("Name fixture should be valid."),
		);

		assert_eq!(primary.internal_key(), "oidc:internal");
		assert_eq!(secondary.tokens_key(), "oidc:tokens:secondary");

		let tokens = TokenSet::builder()
			.access_token("a")
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Token fixture should build.");

		secondary.save_tokens(&tokens).expect("Saving tokens should succeed.");

		assert!(primary.tokens().expect("Read should succeed.").is_none());
		assert_eq!(secondary.tokens().expect("Read should succeed."), Some(tokens));

		secondary.clear().expect("Clear should succeed.");

		assert!(backend.is_empty());
	}

	#[test]
	fn debug_redacts_verifier() {
		assert!(!format!("{:?}", state()).contains("verifier\""));
	}
}
