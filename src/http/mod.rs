
use std::{fmt, thread, time::Duration};

use base64::Engine as _;
use rand::Rng as _;

use crate::EventHandler;

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("GET {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {kind}")]
    Transport {
        url: String,
        kind: ureq::ErrorKind,
        message: Option<String>,
    },
}

impl HttpError {
    /// Whether a new attempt may succeed.
    fn is_transient(&self) -> bool {
        match self {
            HttpError::Status { status, .. } => *status == 429 || *status >= 500,
            HttpError::Transport { .. } => true,
        }
    }
}

/// Remove the user and password of `url`, so it can be shown in
/// errors and logs.
pub(crate) fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }

        _ => url.to_owned(),
    }
}

/// Credentials sent in the `Authorization` header.
#[derive(Clone)]
pub enum Credentials {
    Bearer(String),
    Basic { username: String, password: String },
}

impl Credentials {
    fn header_value(&self) -> String {
        match self {
            Credentials::Bearer(token) => format!("Bearer {token}"),
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                format!("Basic {encoded}")
            }
        }
    }
}

// Never print the secrets.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// How many times a request is sent before giving up.
///
/// Only transport errors and `429`/`5xx` responses are retried. The
/// delay before attempt `n` (starting at 1 for the first retry) is
/// `base_delay * 2^(n-1)`, plus a random jitter up to `base_delay`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Send each request once.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::ZERO,
    };

    fn delay(&self, retry: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));

        let jitter = match self.base_delay.as_millis() as u64 {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };

        backoff + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::NONE
    }
}

/// Settings for the HTTP agent.
#[derive(Clone, Debug)]
pub(crate) struct ClientOptions {
    pub timeout_connect: Duration,
    pub timeout_read: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            timeout_connect: Duration::from_secs(30),
            timeout_read: Duration::from_secs(300),
            retry: RetryPolicy::NONE,
        }
    }
}

/// HTTP client that adds the same headers to every request.
pub(crate) struct Client<'a> {
    agent: ureq::Agent,
    event_handler: &'a dyn EventHandler,
    authorization: Option<String>,
    user_agent: String,
    retry: RetryPolicy,
}

impl<'a> Client<'a> {
    pub fn new(
        credentials: Option<&Credentials>,
        client_version: &str,
        options: &ClientOptions,
        event_handler: &'a dyn EventHandler,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(options.timeout_connect)
            .timeout_read(options.timeout_read)
            .build();

        Client {
            agent,
            event_handler,
            authorization: credentials.map(Credentials::header_value),
            user_agent: format!("Xray/{client_version}"),
            retry: options.retry,
        }
    }

    /// Send a `GET` request.
    ///
    /// Non-2xx responses are returned as [`HttpError::Status`].
    pub fn get(&self, url: &str, accept: Option<&str>) -> Result<ureq::Response, HttpError> {
        let mut retry = 0;
        loop {
            match self.send(url, accept) {
                Err(e) if e.is_transient() && retry + 1 < self.retry.max_attempts => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    tracing::warn!(error = %e, ?delay, "retrying request");
                    thread::sleep(delay);
                }

                r => return r,
            }
        }
    }

    fn send(&self, url: &str, accept: Option<&str>) -> Result<ureq::Response, HttpError> {
        let mut request = self.agent.get(url).set("User-Agent", &self.user_agent);

        if let Some(accept) = accept {
            request = request.set("Accept", accept);
        }

        if let Some(auth) = &self.authorization {
            request = request.set("Authorization", auth);
        }

        let shown_url = redact_url(url);
        self.event_handler.registry_request(&shown_url);
        tracing::debug!(url = %shown_url, "GET");

        match request.call() {
            Ok(response) => Ok(response),

            Err(ureq::Error::Status(status, _)) => Err(HttpError::Status {
                url: shown_url,
                status,
            }),

            // The transport error is not kept, since its message may
            // include the full URL.
            Err(ureq::Error::Transport(t)) => Err(HttpError::Transport {
                url: shown_url,
                kind: t.kind(),
                message: t.message().map(str::to_owned),
            }),
        }
    }
}
