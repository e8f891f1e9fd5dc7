//! Streaming Session Credential
//!
//! The equities venue authorizes a stream with a session id obtained out of
//! band. The id may be configured at startup or installed later at runtime;
//! until it is present every equities subscribe fails fast.
//!
//! The value never appears in `Debug` output or logs.

use parking_lot::RwLock;

/// Holder for the equities streaming session id.
#[derive(Default)]
pub struct SessionCredential {
    session_id: RwLock<Option<String>>,
}

impl SessionCredential {
    /// Create an empty credential.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a credential with an initial value.
    ///
    /// Blank values are treated as absent.
    #[must_use]
    pub fn with_session_id(session_id: Option<String>) -> Self {
        let credential = Self::new();
        if let Some(id) = session_id {
            credential.set(id);
        }
        credential
    }

    /// Install or replace the session id.
    ///
    /// Blank values clear the credential.
    pub fn set(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        let trimmed = session_id.trim();
        let len = trimmed.len();

        *self.session_id.write() = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };

        tracing::info!(len, "Equities session id set");
    }

    /// Remove the session id.
    pub fn clear(&self) {
        *self.session_id.write() = None;
    }

    /// Check whether a session id is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.session_id.read().is_some()
    }

    /// Get a copy of the session id.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = if self.is_set() { "[REDACTED]" } else { "<unset>" };
        f.debug_struct("SessionCredential")
            .field("session_id", &shown)
            .finish()
    }
}
