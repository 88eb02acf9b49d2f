//! Per-user encrypted credential store.
//!
//! One file per credential under a directory with permissions `0700`
//! (files `0600`) on POSIX. Values are encrypted before they reach
//! disk; plaintext never leaves process memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fleetmind_core::CoreError;

use crate::crypto::CredentialCipher;

/// Application identity used for key derivation.
const APP_IDENTITY: &str = "fleetmind";

/// Encrypted key/value credential store.
pub struct CredentialStore {
    dir: PathBuf,
    cipher: CredentialCipher,
}

impl CredentialStore {
    /// Open (creating if needed) the store at the given directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        restrict_dir_permissions(&dir)?;

        Ok(Self {
            dir,
            cipher: CredentialCipher::from_identity(APP_IDENTITY),
        })
    }

    /// Open the per-user default location (`~/.fleetmind/credentials`).
    pub fn open_default() -> Result<Self, CoreError> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .ok_or_else(|| CoreError::internal("no home directory for credential store"))?;
        let mut dir = PathBuf::from(home);
        dir.push(".fleetmind");
        dir.push("credentials");
        Self::open(dir)
    }

    /// Store a credential.
    pub fn set(&self, name: &str, value: &str) -> Result<(), CoreError> {
        let path = self.credential_path(name)?;
        let encrypted = self.cipher.encrypt(value)?;
        std::fs::write(&path, encrypted)?;
        restrict_file_permissions(&path)?;
        tracing::debug!(target: "fleetmind::storage", name, "stored credential");
        Ok(())
    }

    /// Read a credential. Returns `None` when absent.
    pub fn get(&self, name: &str) -> Result<Option<String>, CoreError> {
        let path = self.credential_path(name)?;
        let encoded = match std::fs::read_to_string(&path) {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.cipher.decrypt(encoded.trim()).map(Some)
    }

    /// Delete a credential. Deleting an absent credential is a no-op.
    pub fn delete(&self, name: &str) -> Result<(), CoreError> {
        let path = self.credential_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List stored credential names.
    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        let mut names = BTreeMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("cred") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.insert(stem.to_string(), ());
                }
            }
        }
        Ok(names.into_keys().collect())
    }

    fn credential_path(&self, name: &str) -> Result<PathBuf, CoreError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CoreError::internal(format!(
                "invalid credential name: {name:?}"
            )));
        }
        Ok(self.dir.join(format!("{name}.cred")))
    }
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();

        store.set("fleet_api_key", "sk-12345").unwrap();
        assert_eq!(
            store.get("fleet_api_key").unwrap().as_deref(),
            Some("sk-12345")
        );
    }

    #[test]
    fn test_value_is_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();

        store.set("token", "plaintext-secret").unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("token.cred")).unwrap();
        assert!(!on_disk.contains("plaintext-secret"));
    }

    #[test]
    fn test_missing_credential_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a", "b"]);

        store.delete("a").unwrap();
        assert_eq!(store.list().unwrap(), vec!["b"]);
        store.delete("a").unwrap();
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.set("", "x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("creds")).unwrap();
        store.set("token", "value").unwrap();

        let dir_mode = std::fs::metadata(dir.path().join("creds"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = std::fs::metadata(dir.path().join("creds/token.cred"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
