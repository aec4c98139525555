//! Upstream client for the credential authority.
//!
//! Every logical call follows the same order: consult the circuit
//! breaker (fast-reject if open), acquire a bulkhead slot (reject if the
//! queue is full or the wait times out), run the attempt loop under the
//! retry policy, report the outcome to the breaker, release the slot.
//! The slot is held for the whole logical call, not per attempt.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::breaker::{Admission, CircuitBreaker};
use crate::bulkhead::Bulkhead;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::retry::RetryPolicy;

/// Per-attempt timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
/// Per-attempt timeout for credential mutations.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-attempt timeout for read-only lookups.
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Response from a successful (2xx/3xx) upstream call.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub data: Value,
}

/// Resilient client fronting the credential authority.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    retry: RetryPolicy,
}

impl UpstreamClient {
    /// Build a client from gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.auth_service_url.clone(),
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_window,
                config.breaker_cooldown,
            ),
            bulkhead: Bulkhead::new(
                config.bulkhead_max_concurrency,
                config.bulkhead_queue_limit,
                config.bulkhead_queue_timeout,
            ),
            retry: RetryPolicy::new(
                config.retry_max,
                config.retry_base_backoff,
                config.retry_max_jitter,
            ),
        })
    }

    /// `GET /health`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn health(&self) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::GET, "/health", None, None, HEALTH_TIMEOUT)
            .await
    }

    /// `POST /auth/register`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn register(&self, body: &Value) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::POST, "/auth/register", Some(body), None, WRITE_TIMEOUT)
            .await
    }

    /// `POST /auth/login`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn login(&self, body: &Value) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::POST, "/auth/login", Some(body), None, WRITE_TIMEOUT)
            .await
    }

    /// `POST /auth/refresh`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn refresh(&self, body: &Value) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::POST, "/auth/refresh", Some(body), None, WRITE_TIMEOUT)
            .await
    }

    /// `POST /auth/logout`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn logout(&self, body: &Value) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::POST, "/auth/logout", Some(body), None, WRITE_TIMEOUT)
            .await
    }

    /// `POST /auth/logout-all`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn logout_all(&self, bearer: &str) -> Result<UpstreamResponse, GatewayError> {
        self.call(
            Method::POST,
            "/auth/logout-all",
            None,
            Some(bearer),
            WRITE_TIMEOUT,
        )
        .await
    }

    /// `GET /auth/me`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn me(&self, bearer: &str) -> Result<UpstreamResponse, GatewayError> {
        self.call(Method::GET, "/auth/me", None, Some(bearer), READ_TIMEOUT)
            .await
    }

    /// `GET /auth/sessions`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn list_sessions(&self, bearer: &str) -> Result<UpstreamResponse, GatewayError> {
        self.call(
            Method::GET,
            "/auth/sessions",
            None,
            Some(bearer),
            READ_TIMEOUT,
        )
        .await
    }

    /// `DELETE /auth/sessions/{sid}`
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn revoke_session(
        &self,
        bearer: &str,
        sid: &str,
    ) -> Result<UpstreamResponse, GatewayError> {
        self.call(
            Method::DELETE,
            &format!("/auth/sessions/{sid}"),
            None,
            Some(bearer),
            WRITE_TIMEOUT,
        )
        .await
    }

    /// Run one logical upstream call through breaker, bulkhead, and the
    /// retry loop.
    ///
    /// # Errors
    ///
    /// - `CircuitOpen`: rejected without a network attempt
    /// - `QueueFull` / `QueueTimeout`: bulkhead pressure
    /// - `UpstreamStatus`: the upstream answered 4xx; passed through
    /// - `Unavailable`: network failure, timeout, or 5xx after retries
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
        attempt_timeout: Duration,
    ) -> Result<UpstreamResponse, GatewayError> {
        let probe = match self.breaker.try_acquire() {
            Admission::Rejected => {
                debug!(target: "gateway.upstream", %path, "Call rejected, circuit open");
                return Err(GatewayError::CircuitOpen);
            }
            Admission::Probe => true,
            Admission::Allowed => false,
        };

        let permit = match self.bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                // No attempt was made; the probe slot must not stay taken.
                if probe {
                    self.breaker.abort_probe();
                }
                return Err(e);
            }
        };

        let result = self
            .attempt_loop(method, path, body, bearer, attempt_timeout)
            .await;

        match &result {
            // A 4xx means the upstream is reachable and answering.
            Ok(_) | Err(GatewayError::UpstreamStatus { .. }) => self.breaker.record_success(probe),
            Err(_) => self.breaker.record_failure(probe),
        }
        // The slot is released only after the outcome is on the books,
        // so a waiter admitted next sees the breaker's updated state.
        drop(permit);
        result
    }

    async fn attempt_loop(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
        attempt_timeout: Duration,
    ) -> Result<UpstreamResponse, GatewayError> {
        let max_attempts = self.retry.max_attempts_for(&method);
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(attempt_timeout);
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_server_error() {
                        if attempt + 1 < max_attempts {
                            let delay = self.retry.backoff_delay(attempt);
                            warn!(
                                target: "gateway.upstream",
                                %path,
                                status = status.as_u16(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Upstream 5xx, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(GatewayError::Unavailable(format!(
                            "upstream returned {status}"
                        )));
                    }

                    let headers = response.headers().clone();
                    let data = response.json::<Value>().await.unwrap_or(Value::Null);

                    if status.is_client_error() {
                        return Err(GatewayError::UpstreamStatus {
                            status: status.as_u16(),
                            body: data,
                        });
                    }

                    return Ok(UpstreamResponse {
                        status: status.as_u16(),
                        headers,
                        data,
                    });
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt + 1 < max_attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        target: "gateway.upstream",
                        %path,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(GatewayError::Unavailable(format!(
                        "upstream request failed: {e}"
                    )));
                }
            }
        }
    }
}
