use crate::DirectoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Token file written by an external OAuth helper. `expires_at` is seconds
/// since the Unix epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: f64,
}

impl StoredToken {
    /// Reads the token file. A missing file is `Ok(None)`; an unreadable or
    /// malformed one is an authentication error.
    pub fn load(path: &Path) -> Result<Option<Self>, DirectoryError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(DirectoryError::NotAuthenticated(format!(
                    "cannot read token file {}: {err}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&raw).map(Some).map_err(|err| {
            DirectoryError::NotAuthenticated(format!(
                "malformed token file {}: {err}",
                path.display()
            ))
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        now_secs >= self.expires_at
    }

    /// The access token if present and not yet expired.
    pub fn usable_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.is_expired(now) {
            return None;
        }
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn missing_token_file_is_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let loaded = StoredToken::load(&dir.path().join("geni_token.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn token_is_usable_until_expiry() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"access_token": "abc", "refresh_token": "def", "expires_at": 1700000000.5}}"#
        )
        .expect("write token");

        let token = StoredToken::load(file.path())
            .expect("load")
            .expect("present");
        assert_eq!(token.refresh_token.as_deref(), Some("def"));
        assert_eq!(token.usable_access_token(at(1_699_999_000)), Some("abc"));
        assert_eq!(token.usable_access_token(at(1_700_000_001)), None);
    }

    #[test]
    fn malformed_token_file_is_an_auth_error() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write token");

        let err = StoredToken::load(file.path()).expect_err("malformed");
        assert!(err.is_fatal());
    }
}
