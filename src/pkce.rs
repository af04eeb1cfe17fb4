//! PKCE (RFC 7636) verifier generation and S256 challenge derivation.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Verifier length used by [`PkceGenerator::default`].
pub const DEFAULT_VERIFIER_LEN: usize = 128;

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Reasons a verifier cannot produce a challenge.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PkceError {
	/// Verifier length is outside the 43..=128 window.
	#[error("Code verifier must be 43 to 128 characters long, got {len}.")]
	InvalidLength {
		/// Observed length.
		len: usize,
	},
	/// Verifier contains a character outside the unreserved set.
	#[error("Code verifier contains the reserved character {character:?}.")]
	InvalidCharacter {
		/// Offending character.
		character: char,
	},
}

/// Verifier plus its derived challenge.
#[derive(Clone)]
pub struct PkcePair {
	/// Secret verifier sent with the code exchange.
	pub verifier: String,
	/// Challenge sent with the authorization request.
	pub challenge: String,
	/// Challenge method (always `S256`).
	pub method: PkceCodeChallengeMethod,
}
impl Debug for PkcePair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkcePair")
			.field("verifier", &"<redacted>")
			.field("challenge", &self.challenge)
			.field("method", &self.method)
			.finish()
	}
}

/// Produces random verifiers of a configured length.
#[derive(Clone, Copy, Debug)]
pub struct PkceGenerator {
	verifier_len: usize,
}
impl PkceGenerator {
	/// Creates a generator producing verifiers of `verifier_len` characters.
	///
	/// Lengths outside the RFC window make [`PkceGenerator::generate`] fail, which callers
	/// treat as "PKCE unavailable".
	pub const fn new(verifier_len: usize) -> Self {
		Self { verifier_len }
	}

	/// Generates a verifier and derives its challenge.
	pub fn generate(&self) -> Result<PkcePair, PkceError> {
		let verifier = random_string(self.verifier_len);
		let challenge = derive_challenge(&verifier)?;

		Ok(PkcePair { verifier, challenge, method: PkceCodeChallengeMethod::S256 })
	}
}
impl Default for PkceGenerator {
	fn default() -> Self {
		Self::new(DEFAULT_VERIFIER_LEN)
	}
}

/// Derives the base64url (unpadded) SHA-256 challenge of a verifier.
pub fn derive_challenge(verifier: &str) -> Result<String, PkceError> {
	let len = verifier.chars().count();

	if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
		return Err(PkceError::InvalidLength { len });
	}
	if let Some(character) = verifier.chars().find(|c| !is_unreserved(*c)) {
		return Err(PkceError::InvalidCharacter { character });
	}

	Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())))
}

/// Random alphanumeric string used for verifiers, `state`, and `nonce`.
pub fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn is_unreserved(c: char) -> bool {
	c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rfc_7636_appendix_b_vector() {
		let challenge = derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk")
			.expect("RFC verifier should be accepted.");

		assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
	}

	#[test]
	fn default_generator_produces_128_character_verifiers() {
		let pair = PkceGenerator::default().generate().expect("Default generator should succeed.");

		assert_eq!(pair.verifier.len(), 128);
		assert!(pair.verifier.chars().all(is_unreserved));
		assert!(!pair.challenge.contains('='));
		assert_eq!(pair.method.as_str(), "S256");
		assert!(!format!("{pair:?}").contains(&pair.verifier));
	}

	#[test]
	fn invalid_verifiers_are_rejected() {
		assert_eq!(
			PkceGenerator::new(200).generate().map(|pair| pair.challenge),
			Err(PkceError::InvalidLength { len: 200 })
		);
		assert_eq!(
			derive_challenge(&format!("{}+", "a".repeat(50))),
			Err(PkceError::InvalidCharacter { character: '+' })
		);
	}
}
