// ProfileStore - keyed persistence for serialised bank descriptions
//
// The store is a flat name -> profile-string map persisted as one JSON
// document guarded by a protocol tag. The tag must match the compiled-in
// literal exactly, so documents written by an incompatible version are
// rejected up front rather than half-parsed. What the stored strings
// contain is the caller's business; the bank hands over its serialised
// description and gets it back verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::ProfileError;

/// Protocol tag required of every store document
pub const PROTOCOL: &str = "v3 31 Oct 2022";

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    protocol: String,
    profiles: BTreeMap<String, String>,
}

/// Keyed string store for detector bank profiles
pub struct ProfileStore {
    path: PathBuf,
    document: StoreDocument,
}

impl ProfileStore {
    /// Open (or initialise) the store at `path`
    ///
    /// A missing file is created with an empty profile map and the current
    /// protocol tag. An existing file must parse and carry the matching
    /// tag.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let document = StoreDocument {
                protocol: PROTOCOL.to_string(),
                profiles: BTreeMap::new(),
            };
            let store = Self { path, document };
            store.write_out()?;
            info!("initialised profile store at {:?}", store.path);
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)?;
        let document: StoreDocument = serde_json::from_str(&contents)?;
        if document.protocol != PROTOCOL {
            return Err(ProfileError::ProtocolMismatch {
                found: document.protocol,
            });
        }

        Ok(Self { path, document })
    }

    /// Fetch the profile stored under `name`
    pub fn get(&self, name: &str) -> Result<String, ProfileError> {
        self.document
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ProfileError::NotFound {
                name: name.to_string(),
            })
    }

    /// Store `profile` under `name`, replacing any existing entry
    ///
    /// The document is flushed to disk before returning.
    pub fn put(&mut self, name: &str, profile: &str) -> Result<(), ProfileError> {
        self.document
            .profiles
            .insert(name.to_string(), profile.to_string());
        self.write_out()
    }

    /// Names of all stored profiles
    pub fn names(&self) -> Vec<String> {
        self.document.profiles.keys().cloned().collect()
    }

    fn write_out(&self) -> Result<(), ProfileError> {
        let contents = serde_json::to_string_pretty(&self.document)
            .expect("store document serialisation is infallible");
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_store_path() -> PathBuf {
        let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "detector_bank_profiles_{}_{}.json",
            std::process::id(),
            unique
        ))
    }

    #[test]
    fn test_missing_store_is_initialised() {
        let path = temp_store_path();
        let store = ProfileStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.names().is_empty());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_put_get_round_trip() {
        let path = temp_store_path();
        {
            let mut store = ProfileStore::open(&path).unwrap();
            store.put("piano", "{\"sr\":44100.0}").unwrap();
        }
        // Re-open: the profile must have been flushed
        let store = ProfileStore::open(&path).unwrap();
        assert_eq!(store.get("piano").unwrap(), "{\"sr\":44100.0}");
        assert_eq!(store.names(), vec!["piano".to_string()]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unknown_profile_not_found() {
        let path = temp_store_path();
        let store = ProfileStore::open(&path).unwrap();
        assert!(matches!(
            store.get("missing"),
            Err(ProfileError::NotFound { .. })
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_protocol_mismatch_rejected() {
        let path = temp_store_path();
        fs::write(
            &path,
            "{\"protocol\": \"v1 1 Jan 2001\", \"profiles\": {}}",
        )
        .unwrap();
        assert!(matches!(
            ProfileStore::open(&path),
            Err(ProfileError::ProtocolMismatch { .. })
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_document_rejected() {
        let path = temp_store_path();
        fs::write(&path, "<profiles/>").unwrap();
        assert!(matches!(
            ProfileStore::open(&path),
            Err(ProfileError::Malformed { .. })
        ));
        fs::remove_file(&path).ok();
    }
}
