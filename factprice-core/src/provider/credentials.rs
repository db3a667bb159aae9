//! Credential store: a plain `key=value` text file.
//!
//! ```text
//! app_key=...
//! app_secret=...
//! redirect_uri=https://127.0.0.1
//! access_token=...
//! refresh_token=...
//! last_issued_at=2024-01-02 09:30:00
//! ```
//!
//! A missing file is replaced by a blank skeleton so the operator knows what
//! to fill in. Writes go to a `.tmp` sibling and are renamed into place, so a
//! crash never leaves a half-written token pair behind.

use chrono::{NaiveDateTime, Timelike};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sortable local timestamp format for `last_issued_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const KEYS: [&str; 6] = [
    "app_key",
    "app_secret",
    "redirect_uri",
    "access_token",
    "refresh_token",
    "last_issued_at",
];

/// Process-wide credential state. Only the OAuth session mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    pub app_key: String,
    pub app_secret: String,
    pub redirect_uri: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub last_issued_at: Option<NaiveDateTime>,
}

impl CredentialState {
    /// Parse the `key=value` format. Unknown keys, blank lines and `#`
    /// comments are ignored; an unparseable timestamp is treated as absent.
    pub fn parse(text: &str) -> Self {
        let mut state = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let non_empty = || (!value.is_empty()).then(|| value.to_string());

            match key.trim() {
                "app_key" => state.app_key = value.to_string(),
                "app_secret" => state.app_secret = value.to_string(),
                "redirect_uri" => state.redirect_uri = value.to_string(),
                "access_token" => state.access_token = non_empty(),
                "refresh_token" => state.refresh_token = non_empty(),
                "last_issued_at" if !value.is_empty() => {
                    match NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
                        Ok(ts) => state.last_issued_at = Some(ts),
                        Err(e) => warn!(%e, "ignoring unparseable last_issued_at"),
                    }
                }
                _ => {}
            }
        }

        state
    }

    /// Render back to the `key=value` format, one line per key.
    pub fn render(&self) -> String {
        let issued = self
            .last_issued_at
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        let values = [
            self.app_key.as_str(),
            self.app_secret.as_str(),
            self.redirect_uri.as_str(),
            self.access_token.as_deref().unwrap_or(""),
            self.refresh_token.as_deref().unwrap_or(""),
            issued.as_str(),
        ];

        KEYS.iter()
            .zip(values)
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect()
    }

    /// Replace the token pair and issuance timestamp together.
    pub fn record_issuance(&mut self, access_token: String, refresh_token: String, at: NaiveDateTime) {
        self.access_token = Some(access_token);
        self.refresh_token = Some(refresh_token);
        self.last_issued_at = Some(at.with_nanosecond(0).unwrap_or(at));
    }
}

/// Durable home of the [`CredentialState`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, creating a blank skeleton file if none exists.
    pub fn load_or_init(&self) -> io::Result<CredentialState> {
        if !self.path.exists() {
            let blank = CredentialState::default();
            self.save(&blank)?;
            info!(path = %self.path.display(), "created blank credential file");
            return Ok(blank);
        }
        Ok(CredentialState::parse(&fs::read_to_string(&self.path)?))
    }

    /// Persist the full state atomically.
    pub fn save(&self, state: &CredentialState) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, state.render())?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })
    }
}
