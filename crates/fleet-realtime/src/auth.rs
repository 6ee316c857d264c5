//! Bearer token sources for the channel handshake

use crate::types::ChannelResult;
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Supplies the bearer token used when a connection is opened.
///
/// The channel asks for a token on every connection attempt, including
/// automatic retries. `None` means "not logged in": nothing is opened.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A token fixed at construction time
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token of the authenticated session.
///
/// Holds the in-memory token set at login and falls back to the persisted
/// session token file when no in-memory token is present.
#[derive(Debug, Default)]
pub struct SessionTokens {
    current: RwLock<Option<String>>,
    persisted_path: Option<PathBuf>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session backed by a token file at `path`
    pub fn with_persisted_path(path: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(None),
            persisted_path: Some(path.into()),
        }
    }

    /// Replace the in-memory token
    pub fn set_token(&self, token: impl Into<String>) {
        *self.current.write() = Some(token.into());
    }

    /// Forget the in-memory token. The persisted token is untouched.
    pub fn clear(&self) {
        self.current.write().take();
    }

    /// Set the in-memory token and write it to the token file
    pub fn persist(&self, token: impl Into<String>) -> ChannelResult<()> {
        let token = token.into();
        if let Some(path) = &self.persisted_path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &token)?;
            debug!(path = %path.display(), "Persisted session token");
        }
        self.set_token(token);
        Ok(())
    }

    /// Log out: drop the in-memory token and delete the token file
    pub fn logout(&self) -> ChannelResult<()> {
        self.clear();
        if let Some(path) = &self.persisted_path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_persisted(&self) -> Option<String> {
        let path = self.persisted_path.as_ref()?;
        match fs::read_to_string(path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read persisted session token");
                None
            }
        }
    }
}

impl TokenProvider for SessionTokens {
    fn token(&self) -> Option<String> {
        if let Some(token) = self.current.read().clone() {
            return Some(token);
        }
        self.read_persisted()
    }
}
