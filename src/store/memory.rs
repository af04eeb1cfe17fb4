//! Thread-safe in-memory [`StorageBackend`] for ephemeral sessions and tests.

// self
use crate::{
	_prelude::*,
	store::{StorageBackend, StoreError},
};

/// Storage medium that keeps entries in-process; contents vanish with the value.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage(Arc<RwLock<HashMap<String, String>>>);
impl MemoryStorage {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Returns `true` when an entry exists under `key`.
	pub fn contains_key(&self, key: &str) -> bool {
		self.0.read().contains_key(key)
	}
}
impl StorageBackend for MemoryStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.0.read().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.0.write().insert(key.to_owned(), value.to_owned());

		Ok(())
	}

	fn remove_item(&self, key: &str) -> Result<(), StoreError> {
		self.0.write().remove(key);

		Ok(())
	}

	fn clear(&self) -> Result<(), StoreError> {
		self.0.write().clear();

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn clones_share_entries() {
		let storage = MemoryStorage::default();
		let view = storage.clone();

		storage.set_item("oidc:tokens", "{}").expect("Write should succeed.");

		assert!(view.contains_key("oidc:tokens"));

		view.remove_item("oidc:tokens").expect("Remove should succeed.");
		view.remove_item("oidc:tokens").expect("Removing a missing key should succeed.");

		assert!(storage.is_empty());
	}
}
