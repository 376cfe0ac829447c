//! Request execution with retry, backoff and rate-limit compliance.
//!
//! Every call against an API goes through one [`Executor`]. Status codes are
//! classified once, here:
//!
//! | status            | handling                                        |
//! |-------------------|-------------------------------------------------|
//! | 2xx               | decode JSON body                                |
//! | 401 / 403         | [`ApiError::Auth`], never retried               |
//! | 404               | [`ApiError::NotFound`] (`lookup` maps to `None`)|
//! | 429               | wait for the reset header, then retry           |
//! | 5xx / network     | exponential backoff, then retry                 |
//! | other 4xx         | [`ApiError::Rejected`], never retried           |
//!
//! 429 and transient failures share one retry budget.

use std::thread;
use std::time::Duration;

use invsync_recon::ApiError;
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::auth::Credentials;

// ── Constants ───────────────────────────────────────────────────────

/// Seconds until the rate-limit window resets.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
/// Requests left in the current window.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

const USER_AGENT: &str = concat!("invsync/", env!("CARGO_PKG_VERSION"));

// ── Policy ──────────────────────────────────────────────────────────

/// Retry and pacing knobs. All waits are expressed in time units so tests
/// can shrink a "second" to a millisecond.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so `max_retries + 1` attempts).
    pub max_retries: u32,
    pub time_unit: Duration,
    /// Units to wait on 429 when the reset header is absent.
    pub rate_limit_fallback: u64,
    /// Remaining-quota value below which the executor pauses.
    pub low_water_mark: u64,
    /// Units to pause when the quota is low.
    pub throttle_pause: u64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            time_unit: Duration::from_secs(1),
            rate_limit_fallback: 60,
            low_water_mark: 10,
            throttle_pause: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn units(&self, n: u64) -> Duration {
        self.time_unit.saturating_mul(n.min(u32::MAX as u64) as u32)
    }
}

// ── Request / response ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
        }
    }
}

/// Decoded successful response. An empty body decodes to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

// ── Executor ────────────────────────────────────────────────────────

pub struct Executor {
    http: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
    policy: RetryPolicy,
}

impl Executor {
    pub fn new(base_url: &str, credentials: Credentials, policy: RetryPolicy) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(policy.timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            policy,
        }
    }

    /// `path` may be relative to the base URL or absolute (pagination links).
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Issue one logical call, retrying transient failures.
    pub fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response, ApiError> {
        let url = self.url(path);
        let attempts = self.policy.max_retries + 1;
        let mut backoff = 1u64;
        let mut last = String::new();

        for attempt in 1..=attempts {
            let mut req = self.credentials.apply(self.http.request(method.into(), &url));
            if let Some(body) = body {
                req = req.json(body);
            }

            let wait = match req.send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match status {
                        401 | 403 => {
                            return Err(ApiError::Auth {
                                status,
                                message: error_message(resp),
                            });
                        }
                        404 => {
                            self.throttle_if_low(&resp);
                            return Err(ApiError::NotFound(path.to_string()));
                        }
                        429 => {
                            last = "HTTP 429 (rate limited)".to_string();
                            let reset = header_u64(&resp, RATE_LIMIT_RESET).unwrap_or(self.policy.rate_limit_fallback);
                            self.policy.units(reset)
                        }
                        s if s >= 500 => {
                            last = format!("HTTP {}: {}", s, error_message(resp));
                            self.policy.units(backoff)
                        }
                        s if s >= 400 => {
                            return Err(ApiError::Rejected {
                                status: s,
                                message: error_message(resp),
                            });
                        }
                        _ => {
                            self.throttle_if_low(&resp);
                            return decode(resp);
                        }
                    }
                }
                Err(e) => {
                    last = e.to_string();
                    self.policy.units(backoff)
                }
            };

            if attempt == attempts {
                break;
            }
            log::warn!(
                "retry {}/{} for {} {} in {:?} ({})",
                attempt,
                self.policy.max_retries,
                reqwest::Method::from(method),
                path,
                wait,
                last,
            );
            thread::sleep(wait);
            backoff = backoff.saturating_mul(2);
        }

        Err(ApiError::MaxRetriesExceeded { attempts, last })
    }

    /// Lookup-style GET: 404 is a negative result, not an error.
    pub fn lookup(&self, path: &str) -> Result<Option<Value>, ApiError> {
        match self.execute(Method::Get, path, None) {
            Ok(resp) => Ok(Some(resp.body)),
            Err(ApiError::NotFound(_)) => {
                log::debug!("lookup {}: not found", path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(Method::Get, path, None).map(|r| r.body)
    }

    pub fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.execute(Method::Post, path, Some(body)).map(|r| r.body)
    }

    pub fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.execute(Method::Put, path, Some(body)).map(|r| r.body)
    }

    pub fn patch(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.execute(Method::Patch, path, Some(body)).map(|r| r.body)
    }

    fn throttle_if_low(&self, resp: &HttpResponse) {
        let Some(remaining) = header_u64(resp, RATE_LIMIT_REMAINING) else {
            return;
        };
        if remaining < self.policy.low_water_mark {
            let pause = self.policy.units(self.policy.throttle_pause);
            log::info!("rate-limit quota low ({} left), pausing {:?}", remaining, pause);
            thread::sleep(pause);
        }
    }
}

fn header_u64(resp: &HttpResponse, name: &str) -> Option<u64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.ceil() as u64)
}

/// Best-effort error text: `error`/`message`/`detail` from a JSON body,
/// else the (truncated) raw body.
fn error_message(resp: HttpResponse) -> String {
    let text = resp.text().unwrap_or_default();
    let text = text.trim_start_matches('\u{feff}').trim();
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        for key in ["error", "message", "detail"] {
            if let Some(msg) = body.get(key).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }
    if text.is_empty() {
        return "empty response body".to_string();
    }
    text.chars().take(200).collect()
}

fn decode(resp: HttpResponse) -> Result<Response, ApiError> {
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .map_err(|e| ApiError::Decode(format!("failed to read response body: {e}")))?;
    // Some endpoints prefix a BOM.
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Response { status, body: Value::Null });
    }
    let body = serde_json::from_str(trimmed).map_err(|e| {
        ApiError::Decode(format!(
            "{} (body: {})",
            e,
            trimmed.chars().take(200).collect::<String>()
        ))
    })?;
    Ok(Response { status, body })
}
