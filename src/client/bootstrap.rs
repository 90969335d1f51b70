//! Device identity and signing key loading.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::{CredentialError, DEFAULT_KEY_DIR, KEY_FILE_EXTENSION};
use crate::crypto::SigningKey;

/// Opaque device identifier: token subject and key lookup name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, CredentialError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CredentialError::EmptyIdentity);
        }
        Ok(Self(id))
    }

    /// The identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<id>.key`, refusing ids that would escape the key directory.
    fn key_file_name(&self) -> Result<String, CredentialError> {
        let id = self.0.as_str();
        if id.contains(['/', '\\']) || id.contains("..") || id.starts_with('.') {
            return Err(CredentialError::UnsafeIdentity(id.to_string()));
        }
        Ok(format!("{id}.{KEY_FILE_EXTENSION}"))
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the device's signing key lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// `<dir>/<device id>.key`.
    Convention {
        /// Key directory.
        dir: PathBuf,
    },
    /// An explicit file.
    Path(PathBuf),
}

impl Default for KeySource {
    fn default() -> Self {
        Self::Convention {
            dir: PathBuf::from(DEFAULT_KEY_DIR),
        }
    }
}

impl KeySource {
    /// Resolve the key path for `identity`.
    pub fn resolve(&self, identity: &DeviceIdentity) -> Result<PathBuf, CredentialError> {
        match self {
            Self::Convention { dir } => Ok(dir.join(identity.key_file_name()?)),
            Self::Path(path) => Ok(path.clone()),
        }
    }

    /// Read the key for `identity`. The bytes are not parsed here.
    pub async fn load(&self, identity: &DeviceIdentity) -> Result<SigningKey, CredentialError> {
        let path = self.resolve(identity)?;
        let pem = read_key(&path).await?;
        debug!(path = %path.display(), "loaded signing key");
        Ok(SigningKey::from_pem(pem))
    }
}

async fn read_key(path: &Path) -> Result<Vec<u8>, CredentialError> {
    tokio::fs::read(path).await.map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => CredentialError::KeyNotFound {
            path: path.to_path_buf(),
        },
        _ => CredentialError::KeyRead {
            path: path.to_path_buf(),
            source,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = include_bytes!("../../testdata/dev-001.key");

    fn identity(id: &str) -> DeviceIdentity {
        DeviceIdentity::new(id).unwrap()
    }

    #[test]
    fn test_identity_rejects_empty() {
        assert!(matches!(
            DeviceIdentity::new(""),
            Err(CredentialError::EmptyIdentity)
        ));
        assert!(matches!(
            DeviceIdentity::new("  "),
            Err(CredentialError::EmptyIdentity)
        ));
    }

    #[test]
    fn test_convention_path() {
        let source = KeySource::default();
        assert_eq!(
            source.resolve(&identity("nrf-352656100000000")).unwrap(),
            PathBuf::from("certificates/nrf-352656100000000.key")
        );
    }

    #[test]
    fn test_convention_rejects_traversal() {
        let source = KeySource::default();
        for id in ["../etc/passwd", "a/b", "a\\b", ".hidden", ".."] {
            assert!(
                matches!(
                    source.resolve(&identity(id)),
                    Err(CredentialError::UnsafeIdentity(_))
                ),
                "{id} accepted"
            );
        }
    }

    #[test]
    fn test_explicit_path_ignores_identity_shape() {
        let source = KeySource::Path(PathBuf::from("/keys/device.pem"));
        assert_eq!(
            source.resolve(&identity("a/b")).unwrap(),
            PathBuf::from("/keys/device.pem")
        );
    }

    #[tokio::test]
    async fn test_load_by_convention() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dev-001.key"), KEY).unwrap();

        let source = KeySource::Convention {
            dir: dir.path().to_path_buf(),
        };
        let key = source.load(&identity("dev-001")).await.unwrap();
        assert_eq!(format!("{key:?}"), "SigningKey([REDACTED])");
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let source = KeySource::Convention {
            dir: dir.path().to_path_buf(),
        };

        match source.load(&identity("dev-002")).await {
            Err(CredentialError::KeyNotFound { path }) => {
                assert_eq!(path, dir.path().join("dev-002.key"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_unreadable_key() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file
        let source = KeySource::Path(dir.path().to_path_buf());
        assert!(matches!(
            source.load(&identity("dev-001")).await,
            Err(CredentialError::KeyRead { .. })
        ));
    }
}
