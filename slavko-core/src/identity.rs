/*!
Access token sources and the structural identity check
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{ACCESS_TOKEN_KEY, IdentityConfig};
use crate::error::{IdentityBoundaryError, TokenStoreError};

/// Every access token starts with this marker
pub const TOKEN_MARKER: &str = "eyJ";

/// Separates the three token segments
pub const TOKEN_SEPARATOR: char = '.';

/// Minimal structural check; this is not cryptographic verification
pub fn validate_access_token(token: &str) -> Result<(), IdentityBoundaryError> {
    if !token.starts_with(TOKEN_MARKER) {
        return Err(IdentityBoundaryError::Malformed {
            reason: format!("missing '{}' marker", TOKEN_MARKER),
        });
    }

    let separators = token.matches(TOKEN_SEPARATOR).count();
    if separators != 2 {
        return Err(IdentityBoundaryError::Malformed {
            reason: format!("expected 3 segments, found {}", separators + 1),
        });
    }

    Ok(())
}

/// Obtain and validate a token in one step
pub fn require_access_token<S: TokenSource + ?Sized>(source: &S) -> Result<String, IdentityBoundaryError> {
    let token = source.access_token().ok_or(IdentityBoundaryError::Missing)?;
    validate_access_token(&token)?;
    Ok(token)
}

/// Anything able to hand out the caller's access token
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
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

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

impl<T: TokenSource + ?Sized> TokenSource for std::sync::Arc<T> {
    fn access_token(&self) -> Option<String> {
        (**self).access_token()
    }
}

/// String key/value store persisted as a single JSON object on disk
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
    token_key: String,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token_key: ACCESS_TOKEN_KEY.to_string(),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            path: config.resolved_storage_path(),
            token_key: config.token_key.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token_key(&self) -> &str {
        &self.token_key
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.read_all()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<bool, TokenStoreError> {
        let mut entries = self.read_all()?;
        let existed = entries.remove(key).is_some();
        if existed {
            self.write_all(&entries)?;
        }
        Ok(existed)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, TokenStoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        debug!("Wrote {} entries to {:?}", entries.len(), self.path);
        Ok(())
    }
}

impl TokenSource for LocalStorage {
    fn access_token(&self) -> Option<String> {
        match self.get(&self.token_key) {
            Ok(token) => token,
            Err(e) => {
                warn!("⚠️ Local storage unreadable at {:?}: {}", self.path, e);
                None
            }
        }
    }
}
