//! Auth-token sources for the realtime channel.
//!
//! The multiplexer never stores credentials itself. It reads the current
//! token from an [`AuthTokenProvider`] every time it opens a connection, and
//! listens for change notifications so it can force a reconnect when the
//! token changes while connected (the server re-evaluates authorization
//! only at connect time).
//!
//! ```rust
//! use realtime_link::{AuthTokenProvider, TokenStore};
//!
//! let store = TokenStore::new();
//! store.set_token("eyJhbGc...");
//! assert_eq!(store.current_token().as_deref(), Some("eyJhbGc..."));
//! store.clear();
//! assert!(store.current_token().is_none());
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Read-only token source with change notification.
pub trait AuthTokenProvider: Send + Sync + 'static {
    /// The token to present on the next connect, if any.
    fn current_token(&self) -> Option<String>;

    /// A receiver that is notified whenever the token changes.
    ///
    /// Providers whose token never changes return `None`.
    fn changes(&self) -> Option<watch::Receiver<Option<String>>> {
        None
    }
}

/// A reference-counted [`AuthTokenProvider`].
pub type ArcAuthTokenProvider = Arc<dyn AuthTokenProvider>;

/// A fixed token (or no token at all).
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Anonymous access: no token is ever presented.
    pub fn none() -> Self {
        Self(None)
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => write!(f, "StaticToken(<redacted>)"),
            None => write!(f, "StaticToken(None)"),
        }
    }
}

impl AuthTokenProvider for StaticToken {
    fn current_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Mutable token store shared between the host application and the
/// multiplexer. Every `set_token` / `clear` notifies subscribers.
#[derive(Clone)]
pub struct TokenStore {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the stored token. Setting the same value again does not
    /// notify.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                false
            } else {
                *current = Some(token);
                true
            }
        });
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.tx.borrow().is_some())
            .finish()
    }
}

impl AuthTokenProvider for TokenStore {
    fn current_token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    fn changes(&self) -> Option<watch::Receiver<Option<String>>> {
        Some(self.tx.subscribe())
    }
}
