use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chat_core::paths::ensure_parent_dir;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access token cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("token cache {path} is not a JSON object, leaving it untouched")]
    Corrupt { path: PathBuf },

    #[error("failed to encode token cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One cache entry, stored under the session name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires > now
    }
}

/// File-backed map of session name to bearer token, shared by every session
/// of the process (and by other processes using the same file).
///
/// Entries are kept as raw JSON so that a write for one session never drops
/// or rewrites another session's entry, even one this process cannot decode.
#[derive(Debug)]
pub struct TokenCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, session_name: &str) -> Option<CachedToken> {
        self.load_at(session_name, Utc::now())
    }

    /// The entry for `session_name` if it is still valid at `now`.
    pub fn load_at(&self, session_name: &str, now: DateTime<Utc>) -> Option<CachedToken> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self
            .read_raw()
            .map_err(|err| warn!("Ignoring token cache: {err}"))
            .ok()?;
        let entry = decode_entry(session_name, entries.get(session_name)?)?;
        if entry.is_valid_at(now) {
            Some(entry)
        } else {
            debug!(
                "Cached token for session {session_name} expired at {}",
                entry.expires
            );
            None
        }
    }

    /// Replace the entry of `session_name`, keeping every other session's entry.
    ///
    /// Fails without writing when the existing file cannot be read or is not a
    /// JSON object.
    pub fn store(
        &self,
        session_name: &str,
        access_token: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_raw()?;
        let entry = CachedToken {
            access_token: access_token.to_string(),
            expires,
        };
        entries.insert(session_name.to_string(), serde_json::to_value(entry)?);
        self.write_all(&entries)
    }

    /// Every decodable entry currently on disk, expired ones included.
    pub fn entries(&self) -> HashMap<String, CachedToken> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.read_raw() {
            Ok(entries) => entries
                .iter()
                .filter_map(|(name, value)| Some((name.clone(), decode_entry(name, value)?)))
                .collect(),
            Err(err) => {
                warn!("Ignoring token cache: {err}");
                HashMap::new()
            }
        }
    }

    fn read_raw(&self) -> Result<Map<String, Value>, CacheError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content) {
            Ok(Value::Object(entries)) => Ok(entries),
            _ => Err(CacheError::Corrupt {
                path: self.path.clone(),
            }),
        }
    }

    fn write_all(&self, entries: &Map<String, Value>) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        ensure_parent_dir(&self.path).map_err(io_err)?;
        let serialized = serde_json::to_string_pretty(entries)?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "gpt-cache.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        fs::write(&tmp_path, serialized).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

fn decode_entry(session_name: &str, value: &Value) -> Option<CachedToken> {
    match CachedToken::deserialize(value) {
        Ok(entry) => Some(entry),
        Err(err) => {
            debug!("Skipping malformed cache entry for session {session_name}: {err}");
            None
        }
    }
}
