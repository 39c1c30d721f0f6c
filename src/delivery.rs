// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Envelope delivery
//!
//! POSTs the envelope as JSON to the collection endpoint. Each attempt is
//! bounded by the configured request timeout; retryable outcomes (HTTP
//! 429/500/502/503/504, connection failures, timeouts) are retried up to the
//! policy's attempt budget with exponential backoff:
//!
//! | retry | delay                               |
//! |-------|-------------------------------------|
//! | 1     | `backoff_base` (1 s)                |
//! | 2     | `2 * backoff_base` (2 s)            |
//! | n     | `min(2^(n-1) * base, backoff_max)`  |
//!
//! A `Retry-After` header on a retryable response replaces the computed
//! delay, capped at `backoff_max`. Only GET and POST are ever retried.
//!
//! ```no_run
//! use posturelib::config::AgentConfig;
//! use posturelib::delivery::{Deliver, DeliveryClient};
//! # fn demo(envelope: &posturelib::envelope::TelemetryEnvelope) {
//! let client = DeliveryClient::from_config(&AgentConfig::default()).unwrap();
//! if !client.send(envelope) {
//!     eprintln!("delivery failed this cycle");
//! }
//! # }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::AgentConfig;
use crate::context::AGENT_VERSION;
use crate::envelope::TelemetryEnvelope;
use crate::error::DeliveryError;

/// HTTP method of a delivery request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Retry budget and classification
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub retry_statuses: Vec<u16>,
    pub retry_methods: Vec<HttpMethod>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(120),
            retry_statuses: vec![429, 500, 502, 503, 504],
            retry_methods: vec![HttpMethod::Get, HttpMethod::Post],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    pub fn allows(&self, method: HttpMethod) -> bool {
        self.retry_methods.contains(&method)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Transport-level failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not connect, or the connection dropped mid-request
    Connect,
    Timeout,
    /// Malformed request, TLS setup, redirect loop, ...
    Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Connect | TransportErrorKind::Timeout)
    }
}

/// TLS handshake failures arrive as connect errors and are retried with them
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// One outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub headers: Vec<(&'static str, String)>,
    pub body: &'a [u8],
    pub timeout: Duration,
}

/// What the delivery logic needs from a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single request; no retries at this layer
pub trait Transport {
    fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport; the connection pool lives as long as the client
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent())
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url),
            HttpMethod::Post => self.client.post(request.url),
            HttpMethod::Put => self.client.put(request.url),
            HttpMethod::Delete => self.client.delete(request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder
            .timeout(request.timeout)
            .body(request.body.to_vec())
            .send()?;

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        Ok(HttpResponse {
            status: response.status().as_u16(),
            retry_after,
        })
    }
}

/// Parse a delta-seconds `Retry-After` value; HTTP dates are ignored
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub fn user_agent() -> String {
    format!("posture-agent/{}", AGENT_VERSION)
}

/// Successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub attempts: u32,
}

/// Anything that can take an envelope off the agent's hands
pub trait Deliver {
    /// Deliver the envelope; `false` means this cycle's delivery failed
    fn send(&self, envelope: &TelemetryEnvelope) -> bool;
}

type Sleeper = Box<dyn Fn(Duration)>;

enum AttemptOutcome {
    Delivered(u16),
    Retryable {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(DeliveryError),
}

/// Delivers envelopes with bounded retry
pub struct DeliveryClient<T: Transport = HttpTransport> {
    url: String,
    credential: Option<String>,
    timeout: Duration,
    policy: RetryPolicy,
    transport: T,
    sleeper: Sleeper,
}

impl DeliveryClient<HttpTransport> {
    /// Build the client once; it is reused for every cycle
    pub fn from_config(config: &AgentConfig) -> Result<Self, DeliveryError> {
        Ok(DeliveryClient::with_transport(config.telemetry_url(), HttpTransport::new()?)
            .with_credential(config.credential().map(str::to_string))
            .with_timeout(config.request_timeout()))
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn with_transport(url: impl Into<String>, transport: T) -> Self {
        Self {
            url: url.into(),
            credential: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_REQUEST_TIMEOUT),
            policy: RetryPolicy::default(),
            transport,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the backoff sleep (tests record delays instead of waiting)
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/json".to_string())];
        if let Some(key) = &self.credential {
            headers.push(("Authorization", format!("Bearer {}", key)));
        }
        headers
    }

    /// Serialize and POST the envelope
    pub fn deliver(&self, envelope: &TelemetryEnvelope) -> Result<DeliveryReceipt, DeliveryError> {
        let body = envelope.to_json()?;
        self.submit(HttpMethod::Post, &body)
    }

    /// Issue `method` with `body`, retrying per policy
    pub fn submit(&self, method: HttpMethod, body: &[u8]) -> Result<DeliveryReceipt, DeliveryError> {
        let request = HttpRequest {
            method,
            url: &self.url,
            headers: self.headers(),
            body,
            timeout: self.timeout,
        };
        let may_retry = self.policy.allows(method);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (reason, retry_after) = match self.attempt(&request) {
                AttemptOutcome::Delivered(status) => {
                    return Ok(DeliveryReceipt {
                        status,
                        attempts: attempt,
                    })
                }
                AttemptOutcome::Fatal(e) => return Err(e),
                AttemptOutcome::Retryable {
                    reason,
                    retry_after,
                } => (reason, retry_after),
            };

            if !may_retry || attempt >= self.policy.max_attempts {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt,
                    last: reason,
                });
            }

            let delay = retry_after
                .map(|d| d.min(self.policy.backoff_max))
                .unwrap_or_else(|| self.policy.backoff(attempt));
            log::warn!(
                "{} {} attempt {}/{} failed ({}), retrying in {:?}",
                method,
                self.url,
                attempt,
                self.policy.max_attempts,
                reason,
                delay
            );
            (self.sleeper)(delay);
        }
    }

    fn attempt(&self, request: &HttpRequest<'_>) -> AttemptOutcome {
        match self.transport.execute(request) {
            Ok(response) if response.is_success() => AttemptOutcome::Delivered(response.status),
            Ok(response) if self.policy.is_retryable_status(response.status) => {
                AttemptOutcome::Retryable {
                    reason: format!("HTTP {}", response.status),
                    retry_after: response.retry_after,
                }
            }
            Ok(response) => AttemptOutcome::Fatal(DeliveryError::Rejected {
                status: response.status,
            }),
            Err(e) if e.is_retryable() => AttemptOutcome::Retryable {
                reason: e.to_string(),
                retry_after: None,
            },
            Err(e) => AttemptOutcome::Fatal(DeliveryError::Transport(e.to_string())),
        }
    }
}

impl<T: Transport> Deliver for DeliveryClient<T> {
    fn send(&self, envelope: &TelemetryEnvelope) -> bool {
        match self.deliver(envelope) {
            Ok(receipt) => {
                log::info!(
                    "telemetry sent (status {}, {} attempt(s))",
                    receipt.status,
                    receipt.attempts
                );
                true
            }
            Err(e) => {
                log::error!("failed to send telemetry: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::sync::mpsc;
    use std::thread;

    /// Replays a fixed list of outcomes and counts attempts
    struct ScriptedTransport {
        script: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
        requests: RefCell<Vec<Vec<(&'static str, String)>>>,
    }

    impl ScriptedTransport {
        fn statuses(statuses: &[u16]) -> Self {
            Self::outcomes(
                statuses
                    .iter()
                    .map(|s| {
                        Ok(HttpResponse {
                            status: *s,
                            retry_after: None,
                        })
                    })
                    .collect(),
            )
        }

        fn outcomes(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                script: RefCell::new(outcomes.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn attempts(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
            self.requests.borrow_mut().push(request.headers.clone());
            self.script
                .borrow_mut()
                .pop_front()
                .expect("transport called more often than scripted")
        }
    }

    fn envelope() -> TelemetryEnvelope {
        TelemetryEnvelope {
            device_id: "C02TEST".into(),
            agent_version: AGENT_VERSION.into(),
            collection_time: "2026-01-05T10:00:00+00:00".into(),
            hostname: "studio.local".into(),
            os_type: "Darwin".into(),
            os_version: "15.1".into(),
            device_name: None,
            topics: BTreeMap::new(),
            collection_errors: Vec::new(),
        }
    }

    fn client(
        transport: ScriptedTransport,
    ) -> (DeliveryClient<ScriptedTransport>, Rc<RefCell<Vec<Duration>>>) {
        let delays = Rc::new(RefCell::new(Vec::new()));
        let recorder = delays.clone();
        let client = DeliveryClient::with_transport("http://collector/api/v1/telemetry", transport)
            .with_sleeper(move |d| recorder.borrow_mut().push(d));
        (client, delays)
    }

    #[test]
    fn test_success_after_two_503s() {
        let (client, delays) = client(ScriptedTransport::statuses(&[503, 503, 200]));
        let receipt = client.deliver(&envelope()).unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(receipt.status, 200);
        assert_eq!(client.transport().attempts(), 3);
        assert_eq!(
            *delays.borrow(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_budget_exhausted_after_three_attempts() {
        let (client, delays) = client(ScriptedTransport::statuses(&[503, 503, 503, 503]));
        match client.deliver(&envelope()) {
            Err(DeliveryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "HTTP 503");
            }
            other => panic!("expected exhausted budget, got {:?}", other),
        }
        assert_eq!(client.transport().attempts(), 3);
        assert_eq!(client.transport().script.borrow().len(), 1);
        assert_eq!(delays.borrow().len(), 2);
    }

    #[test]
    fn test_send_reports_failure_as_false() {
        let (client, _) = client(ScriptedTransport::statuses(&[500, 502, 504]));
        assert!(!client.send(&envelope()));
        assert_eq!(client.transport().attempts(), 3);
    }

    #[test]
    fn test_404_fails_immediately() {
        let (client, delays) = client(ScriptedTransport::statuses(&[404]));
        match client.deliver(&envelope()) {
            Err(DeliveryError::Rejected { status }) => assert_eq!(status, 404),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(client.transport().attempts(), 1);
        assert!(delays.borrow().is_empty());
    }

    #[test]
    fn test_429_is_retryable_and_honours_retry_after() {
        let transport = ScriptedTransport::outcomes(vec![
            Ok(HttpResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(7)),
            }),
            Ok(HttpResponse {
                status: 202,
                retry_after: None,
            }),
        ]);
        let (client, delays) = client(transport);
        assert!(client.send(&envelope()));
        assert_eq!(*delays.borrow(), vec![Duration::from_secs(7)]);
    }

    #[test]
    fn test_retry_after_capped_at_backoff_max() {
        let transport = ScriptedTransport::outcomes(vec![
            Ok(HttpResponse {
                status: 503,
                retry_after: Some(Duration::from_secs(3600)),
            }),
            Ok(HttpResponse {
                status: 200,
                retry_after: None,
            }),
        ]);
        let (client, delays) = client(transport);
        assert!(client.send(&envelope()));
        assert_eq!(*delays.borrow(), vec![Duration::from_secs(120)]);
    }

    #[test]
    fn test_connection_failure_retried() {
        let transport = ScriptedTransport::outcomes(vec![
            Err(TransportError::new(TransportErrorKind::Connect, "connection refused")),
            Err(TransportError::new(TransportErrorKind::Timeout, "timed out")),
            Ok(HttpResponse {
                status: 200,
                retry_after: None,
            }),
        ]);
        let (client, _) = client(transport);
        assert_eq!(client.deliver(&envelope()).unwrap().attempts, 3);
    }

    #[test]
    fn test_other_transport_error_not_retried() {
        let transport = ScriptedTransport::outcomes(vec![Err(TransportError::new(
            TransportErrorKind::Other,
            "builder error",
        ))]);
        let (client, _) = client(transport);
        assert!(matches!(
            client.deliver(&envelope()),
            Err(DeliveryError::Transport(_))
        ));
        assert_eq!(client.transport().attempts(), 1);
    }

    #[test]
    fn test_put_is_never_retried() {
        let (client, delays) = client(ScriptedTransport::statuses(&[503, 200]));
        let err = client.submit(HttpMethod::Put, b"{}").unwrap_err();
        assert!(matches!(err, DeliveryError::Exhausted { attempts: 1, .. }));
        assert!(delays.borrow().is_empty());
    }

    #[test]
    fn test_bearer_header_only_when_configured() {
        let (anonymous, _) = client(ScriptedTransport::statuses(&[200]));
        anonymous.deliver(&envelope()).unwrap();
        let headers = anonymous.transport().requests.borrow()[0].clone();
        assert!(headers.iter().all(|(name, _)| *name != "Authorization"));

        let (with_key, _) = client(ScriptedTransport::statuses(&[200]));
        let with_key = with_key.with_credential(Some("token-123".into()));
        with_key.deliver(&envelope()).unwrap();
        let headers = with_key.transport().requests.borrow()[0].clone();
        assert!(headers.contains(&("Authorization", "Bearer token-123".to_string())));
        assert!(headers.contains(&("Content-Type", "application/json".to_string())));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(40), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    /// Answer one request per canned response, returning the raw requests
    fn serve(listener: TcpListener, responses: Vec<&'static str>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = match listener.accept() {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = stream.read(&mut buf).unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&raw).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .and_then(|v| v.trim().parse::<usize>().ok())
                            })
                            .unwrap_or(0);
                        if raw.len() >= end + 4 + length {
                            break;
                        }
                    }
                }
                let _ = stream.write_all(response.as_bytes());
                let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
            }
        });
        rx
    }

    #[test]
    fn test_http_transport_sends_headers_and_body() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = serve(
            listener,
            vec!["HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"],
        );

        let config = AgentConfig {
            api_endpoint: format!("http://127.0.0.1:{}", port),
            api_key: Some("token-123".into()),
            ..AgentConfig::default()
        };
        let client = DeliveryClient::from_config(&config).unwrap();
        assert!(client.send(&envelope()));

        let raw = requests.recv_timeout(Duration::from_secs(5)).unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /api/v1/telemetry HTTP/1.1"));
        assert!(lower.contains("authorization: bearer token-123"));
        assert!(lower.contains("content-type: application/json"));
        assert!(lower.contains(&format!("user-agent: posture-agent/{}", AGENT_VERSION)));
        assert!(raw.contains("\"device_id\":\"C02TEST\""));
    }

    #[test]
    fn test_http_transport_retries_on_503() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = serve(
            listener,
            vec![
                "HTTP/1.1 503 Service Unavailable\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                "HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            ],
        );

        let delays = Rc::new(RefCell::new(Vec::new()));
        let recorder = delays.clone();
        let client = DeliveryClient::with_transport(
            format!("http://127.0.0.1:{}/api/v1/telemetry", port),
            HttpTransport::new().unwrap(),
        )
        .with_sleeper(move |d| recorder.borrow_mut().push(d));

        let receipt = client.deliver(&envelope()).unwrap();
        assert_eq!(receipt.status, 201);
        assert_eq!(receipt.attempts, 2);
        assert_eq!(*delays.borrow(), vec![Duration::ZERO]);
        assert!(requests.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(requests.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_http_transport_connection_refused_exhausts_budget() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let delays = Rc::new(RefCell::new(Vec::new()));
        let recorder = delays.clone();
        let client = DeliveryClient::with_transport(
            format!("http://127.0.0.1:{}/api/v1/telemetry", port),
            HttpTransport::new().unwrap(),
        )
        .with_timeout(Duration::from_secs(2))
        .with_sleeper(move |d| recorder.borrow_mut().push(d));

        match client.deliver(&envelope()) {
            Err(DeliveryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhausted budget, got {:?}", other),
        }
        assert_eq!(delays.borrow().len(), 2);
    }
}
