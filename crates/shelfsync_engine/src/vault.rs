//! Credential access.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Access details for the remote object store.
///
/// The secret is wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RemoteCredentials {
    /// Store endpoint URL.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Access key identifier.
    pub access_key_id: String,
    secret_access_key: String,
}

impl RemoteCredentials {
    /// Creates a credential set.
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Returns the secret key.
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Source of remote credentials.
///
/// How credentials are stored at rest is up to the implementation.
pub trait CredentialVault: Send + Sync {
    /// Returns the current credentials, or `None` if sync is not set up.
    fn credentials(&self) -> Option<RemoteCredentials>;
}

/// A vault holding a fixed credential set.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialVault {
    credentials: Option<RemoteCredentials>,
}

impl StaticCredentialVault {
    /// Creates a vault with credentials.
    pub fn new(credentials: RemoteCredentials) -> Self {
        Self {
            credentials: Some(credentials),
        }
    }

    /// Creates a vault with nothing configured.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl CredentialVault for StaticCredentialVault {
    fn credentials(&self) -> Option<RemoteCredentials> {
        self.credentials.clone()
    }
}
