//! Access to the remote genealogy directory: the [`ProfileDirectory`] seam
//! used by the propagation engine, the Geni HTTP client behind it, and the
//! rate limiting shared by every remote call.

use thiserror::Error;
use ydna_core::{ImmediateFamily, Profile};

mod geni;
mod rate_limit;
mod token;
pub mod wire;

pub use geni::{GeniClient, GeniSettings, DEFAULT_BASE_URL};
pub use rate_limit::{Clock, RateLimiter, RetryPolicy, SystemClock};
pub use token::StoredToken;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("still rate limited after {attempts} attempts")]
    Throttled { attempts: u32 },
    #[error("directory returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode directory response: {0}")]
    Decode(String),
}

impl DirectoryError {
    /// Authentication failures abort a run; everything else is contained at
    /// the resolver and treated as "no further relatives".
    pub fn is_fatal(&self) -> bool {
        matches!(self, DirectoryError::NotAuthenticated(_))
    }
}

/// Remote source of profiles and immediate-family graphs.
pub trait ProfileDirectory {
    fn fetch_profile(&self, profile_id: &str) -> Result<Profile, DirectoryError>;

    /// Focus profile plus its parents, partners and children. Identifiers in
    /// the result are canonical and may differ from `profile_id`.
    fn fetch_immediate_family(&self, profile_id: &str) -> Result<ImmediateFamily, DirectoryError>;
}

impl<D: ProfileDirectory + ?Sized> ProfileDirectory for &D {
    fn fetch_profile(&self, profile_id: &str) -> Result<Profile, DirectoryError> {
        (**self).fetch_profile(profile_id)
    }

    fn fetch_immediate_family(&self, profile_id: &str) -> Result<ImmediateFamily, DirectoryError> {
        (**self).fetch_immediate_family(profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_authentication_errors_are_fatal() {
        assert!(DirectoryError::NotAuthenticated("expired".to_string()).is_fatal());
        assert!(!DirectoryError::Throttled { attempts: 3 }.is_fatal());
        assert!(!DirectoryError::Remote {
            status: 500,
            message: "boom".to_string()
        }
        .is_fatal());
        assert!(!DirectoryError::Transport("reset".to_string()).is_fatal());
    }
}
