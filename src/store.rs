//! Storage contracts, built-in storage media, and the token store scoped per configuration.
//!
//! Storage access is synchronous from the caller's perspective. Backends keep their own
//! interior locking, so a single [`StorageBackend`] may be shared between the token store and
//! the discovery cache.

pub mod file;
pub mod memory;
pub mod tokens;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use tokens::*;

// self
use crate::_prelude::*;

/// Key-value storage medium contract.
pub trait StorageBackend
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`.
	fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

	/// Removes `key`; missing keys are not an error.
	fn remove_item(&self, key: &str) -> Result<(), StoreError>;

	/// Removes every entry.
	fn clear(&self) -> Result<(), StoreError>;
}
impl dyn StorageBackend {
	/// Reads and deserializes a JSON document stored under `key`.
	pub fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
	where
		T: for<'de> Deserialize<'de>,
	{
		let Some(raw) = self.get_item(key)? else {
			return Ok(None);
		};

		serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse entry {key}: {e}"),
		})
	}

	/// Serializes `value` as JSON and stores it under `key`.
	pub fn set_json<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
	where
		T: Serialize,
	{
		let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize entry {key}: {e}"),
		})?;

		self.set_item(key, &raw)
	}
}

/// Error type produced by [`StorageBackend`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage medium.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn store_error_converts_into_engine_error_with_source() {
		let store_error = StoreError::Backend { message: "quota exceeded".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("quota exceeded"));

		let source = StdError::source(&error)
			.expect("Engine error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn json_helpers_report_corrupt_entries() {
		let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::default());

		backend.set_item("entry", "{not json").expect("Raw write should succeed.");

		let err = backend
			.get_json::<JsonValue>("entry")
			.expect_err("Corrupt entries should surface a serialization error.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		backend.set_json("entry", &serde_json::json!({"a": 1})).expect("JSON write should succeed.");

		assert_eq!(
			backend.get_json::<JsonValue>("entry").expect("JSON read should succeed."),
			Some(serde_json::json!({"a": 1}))
		);
	}
}
