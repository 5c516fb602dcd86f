//! Token check for the network transport handshake

use async_trait::async_trait;

use crate::traits::Authenticator;
use shared::ClientKind;

/// Shared-token authenticator.
///
/// With no expected token configured the daemon runs open; the caller is
/// expected to warn loudly about that at startup.
pub struct RealAuthenticator {
    expected: Option<String>,
}

impl RealAuthenticator {
    pub fn new(expected: Option<String>) -> Self {
        Self { expected }
    }

    /// Whether any token is accepted
    pub fn is_open(&self) -> bool {
        self.expected.is_none()
    }
}

#[async_trait]
impl Authenticator for RealAuthenticator {
    async fn authenticate(&self, token: &str, _client_type: ClientKind) -> bool {
        match &self.expected {
            Some(expected) => token == expected,
            None => true,
        }
    }
}
