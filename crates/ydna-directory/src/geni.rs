use crate::rate_limit::{RateLimiter, RetryPolicy};
use crate::wire::{decode_family, decode_profile, decode_search};
use crate::{DirectoryError, ProfileDirectory};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use ydna_core::{normalize_profile_id, ImmediateFamily, Profile};

pub const DEFAULT_BASE_URL: &str = "https://www.geni.com";

#[derive(Debug, Clone)]
pub struct GeniSettings {
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GeniSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Blocking client for the Geni REST API. Every request, retries included,
/// first waits its turn on the shared [`RateLimiter`].
pub struct GeniClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl GeniClient {
    pub fn new(settings: GeniSettings, limiter: RateLimiter) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| DirectoryError::Transport(format!("could not build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: settings
                .access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            limiter,
            retry: settings.retry,
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub fn search_profiles(&self, names: &str) -> Result<Vec<Profile>, DirectoryError> {
        let value = self.get_json("profile/search", &[("names", names)])?;
        decode_search(&value)
    }

    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, DirectoryError> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            DirectoryError::NotAuthenticated("no access token configured".to_string())
        })?;
        let url = self.endpoint_url(endpoint);
        let mut params = query.to_vec();
        params.push(("access_token", token));

        let attempts = self.retry.max_retries.max(1);
        for attempt in 0..attempts {
            self.limiter.wait_turn();
            debug!(endpoint, attempt, "directory request");

            let response = self
                .http
                .get(&url)
                .query(&params)
                .send()
                .map_err(|err| DirectoryError::Transport(err.without_url().to_string()))?;
            let status = response.status();

            if status.is_success() {
                return response
                    .json::<Value>()
                    .map_err(|err| DirectoryError::Decode(err.without_url().to_string()));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 == attempts {
                    warn!(endpoint, attempts, "throttled by directory, giving up");
                    break;
                }
                let wait = self.retry.delay_for(attempt);
                warn!(endpoint, wait_secs = wait.as_secs_f64(), "throttled by directory");
                self.limiter.pause(wait);
                continue;
            }

            let message = response.text().unwrap_or_default().trim().to_string();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                return Err(DirectoryError::NotAuthenticated(format!(
                    "directory rejected the access token ({status}): {message}"
                )));
            }
            return Err(DirectoryError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Err(DirectoryError::Throttled { attempts })
    }
}

impl ProfileDirectory for GeniClient {
    fn fetch_profile(&self, profile_id: &str) -> Result<Profile, DirectoryError> {
        let profile_id = normalize_profile_id(profile_id);
        let value = self.get_json(&profile_id, &[])?;
        decode_profile(&value)
    }

    fn fetch_immediate_family(&self, profile_id: &str) -> Result<ImmediateFamily, DirectoryError> {
        let profile_id = normalize_profile_id(profile_id);
        let value = self.get_json(&format!("{profile_id}/immediate-family"), &[])?;
        decode_family(&value, &profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::tests::ManualClock;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Serves `responses` in order, one connection each, and counts the
    /// requests answered. Returns the base URL to point a client at.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();

        thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (base_url, served)
    }

    fn client(token: Option<&str>, clock: Arc<ManualClock>) -> GeniClient {
        client_at("https://geni.test/", token, clock)
    }

    fn client_at(base_url: &str, token: Option<&str>, clock: Arc<ManualClock>) -> GeniClient {
        let settings = GeniSettings {
            base_url: base_url.to_string(),
            access_token: token.map(str::to_string),
            ..GeniSettings::default()
        };
        GeniClient::new(settings, RateLimiter::with_clock(Duration::from_secs(2), clock))
            .expect("client")
    }

    #[test]
    fn endpoint_urls_join_base_and_api_path() {
        let geni = client(Some("token"), Arc::new(ManualClock::new()));
        assert_eq!(
            geni.endpoint_url("profile-1/immediate-family"),
            "https://geni.test/api/profile-1/immediate-family"
        );
    }

    #[test]
    fn missing_token_fails_before_any_request() {
        let clock = Arc::new(ManualClock::new());
        let geni = client(Some("   "), clock.clone());

        let err = geni.fetch_profile("42").expect_err("no token");

        assert!(err.is_fatal());
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[test]
    fn throttling_backs_off_linearly_then_gives_up() {
        let (base_url, served) = serve(vec![(429, "{}"), (429, "{}"), (429, "{}")]);
        let clock = Arc::new(ManualClock::new());
        let geni = client_at(&base_url, Some("token"), clock.clone());

        let err = geni.fetch_profile("profile-1").expect_err("throttled");

        assert_eq!(err, DirectoryError::Throttled { attempts: 3 });
        assert!(!err.is_fatal());
        assert_eq!(
            clock.recorded_sleeps(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn throttled_request_succeeds_on_retry() {
        let (base_url, served) = serve(vec![
            (429, "{}"),
            (200, r#"{"id": "profile-1", "first_name": "John", "gender": "male"}"#),
        ]);
        let clock = Arc::new(ManualClock::new());
        let geni = client_at(&base_url, Some("token"), clock.clone());

        let profile = geni.fetch_profile("1").expect("profile");

        assert_eq!(profile.id, "profile-1");
        assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(5)]);
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_token_is_not_authenticated() {
        for status in [401, 403] {
            let (base_url, served) = serve(vec![(status, r#"{"error": "invalid token"}"#)]);
            let clock = Arc::new(ManualClock::new());
            let geni = client_at(&base_url, Some("token"), clock.clone());

            let err = geni.fetch_profile("profile-1").expect_err("rejected");

            assert!(matches!(err, DirectoryError::NotAuthenticated(_)), "{status}: {err:?}");
            assert!(err.is_fatal());
            assert!(clock.recorded_sleeps().is_empty());
            assert_eq!(served.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn other_failures_are_remote_errors() {
        let (base_url, served) = serve(vec![(500, "boom")]);
        let clock = Arc::new(ManualClock::new());
        let geni = client_at(&base_url, Some("token"), clock);

        let err = geni
            .fetch_immediate_family("profile-1")
            .expect_err("server error");

        assert_eq!(
            err,
            DirectoryError::Remote {
                status: 500,
                message: "boom".to_string()
            }
        );
        assert!(!err.is_fatal());
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }
}
