//! Resilient HTTP fetch layer.
//!
//! [`ResilientClient`] wraps `reqwest` with the protections every outbound
//! request needs: the shared rate limiter, a global error-streak cooldown,
//! randomized pre-request jitter, rotating User-Agent headers, and a cache of
//! per-proxy clients. Response classification is deliberately conservative:
//! an HTTP 404 is a definitive answer, not a failure.

mod endpoint_pool;
mod rate_limiter;
mod user_agent;

pub use endpoint_pool::EndpointPool;
pub use rate_limiter::RateLimiter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::StatusCode;

use watchtower_types::error::LookupError;
use watchtower_types::models::{RateLimitConfig, RequestConfig};

use user_agent::UserAgentRotation;

/// Pre-request jitter bounds, in milliseconds.
const JITTER_MS: (u64, u64) = (50, 200);

/// What the remote actually said, once transport succeeded.
#[derive(Debug)]
pub enum FetchOutcome {
    /// HTTP 200 with a parseable JSON body.
    Json(serde_json::Value),
    /// HTTP 404. Definitive, terminates retries upstream.
    NotFound,
}

#[derive(Debug)]
pub struct FetchResponse {
    pub outcome: FetchOutcome,
    /// Wall-clock request duration in seconds.
    pub elapsed: f64,
}

/// Result of probing an endpoint with a connectivity check.
#[derive(Debug, serde::Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    pub status: Option<u16>,
    pub elapsed: f64,
    /// Exit IP as reported by the probe target, when the body carries one.
    pub exit_ip: Option<String>,
}

struct ErrorStreak {
    consecutive: AtomicU32,
    last_at: parking_lot::RwLock<Option<Instant>>,
}

/// HTTP client with rate limiting and an error-streak circuit breaker.
pub struct ResilientClient {
    direct: reqwest::Client,
    // Proxy URL -> dedicated client, built lazily.
    proxied: tokio::sync::RwLock<HashMap<String, reqwest::Client>>,
    limiter: RateLimiter,
    agents: UserAgentRotation,
    streak: ErrorStreak,
    timeout: Duration,
    max_consecutive_errors: u32,
    error_cooldown: Duration,
}

impl ResilientClient {
    pub fn new(rate: &RateLimitConfig, request: &RequestConfig) -> Result<Self, LookupError> {
        let timeout = Duration::from_secs(request.timeout_secs);
        let direct = Self::builder(timeout)
            .build()
            .map_err(|e| LookupError::Transport { message: e.to_string() })?;

        Ok(Self {
            direct,
            proxied: tokio::sync::RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(rate.requests_per_minute, rate.burst),
            agents: UserAgentRotation::default(),
            streak: ErrorStreak {
                consecutive: AtomicU32::new(0),
                last_at: parking_lot::RwLock::new(None),
            },
            timeout,
            max_consecutive_errors: request.max_consecutive_errors,
            error_cooldown: Duration::from_secs(request.error_cooldown_secs),
        })
    }

    fn builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
    }

    /// Consecutive transport errors since the last successful response.
    pub fn error_streak(&self) -> u32 {
        self.streak.consecutive.load(Ordering::Relaxed)
    }

    /// Fetch `url` and classify the response.
    ///
    /// Waits on the rate limiter and checks the cooldown breaker before any
    /// network I/O. Transport failures through a proxy blame the proxy;
    /// direct transport failures feed the global error streak.
    pub async fn fetch(
        &self,
        url: &str,
        proxy: Option<&str>,
    ) -> Result<FetchResponse, LookupError> {
        self.check_cooldown()?;
        self.limiter.acquire().await;

        let jitter = rand::thread_rng().gen_range(JITTER_MS.0..=JITTER_MS.1);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let client = match proxy {
            Some(p) => self.proxied_client(p).await?,
            None => self.direct.clone(),
        };

        let started = Instant::now();
        let response = client
            .get(url)
            .header("User-Agent", self.agents.next())
            .header("Accept", "application/json, text/html;q=0.9, */*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.record_transport_error();
                return Err(match proxy {
                    Some(p) => LookupError::Endpoint {
                        endpoint: p.to_string(),
                        message: e.to_string(),
                    },
                    None => LookupError::Transport { message: e.to_string() },
                });
            }
        };

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.text().await.map_err(|e| LookupError::Transport {
                    message: e.to_string(),
                })?;
                let value: serde_json::Value =
                    serde_json::from_str(&body).map_err(|e| LookupError::InvalidResponse {
                        endpoint: url.to_string(),
                        message: e.to_string(),
                    })?;
                self.reset_error_streak();
                Ok(FetchResponse { outcome: FetchOutcome::Json(value), elapsed })
            }
            StatusCode::NOT_FOUND => {
                self.reset_error_streak();
                Ok(FetchResponse { outcome: FetchOutcome::NotFound, elapsed })
            }
            StatusCode::FORBIDDEN if proxy.is_some() => {
                // Blocks are almost always tied to the exit address.
                Err(LookupError::Endpoint {
                    endpoint: proxy.unwrap_or_default().to_string(),
                    message: "blocked by remote (403)".to_string(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LookupError::Endpoint {
                endpoint: url.to_string(),
                message: "rate limited by remote (429)".to_string(),
            }),
            other => Err(LookupError::UnexpectedStatus {
                endpoint: url.to_string(),
                status: other.as_u16(),
                message: upstream_error_message(response).await,
            }),
        }
    }

    /// Probe `url`, optionally through `proxy`, without touching the breaker.
    ///
    /// Used by the endpoint-testing surface. A body with an `origin` or `ip`
    /// field yields the observed exit IP.
    pub async fn probe(&self, url: &str, proxy: Option<&str>) -> ProbeReport {
        let client = match proxy {
            Some(p) => match self.proxied_client(p).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(proxy = %p, error = %e, "probe client build failed");
                    return ProbeReport { ok: false, status: None, elapsed: 0.0, exit_ip: None };
                }
            },
            None => self.direct.clone(),
        };

        let started = Instant::now();
        match client.get(url).header("User-Agent", self.agents.next()).send().await {
            Ok(resp) => {
                let status = resp.status();
                let exit_ip = resp
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| {
                        v.get("origin")
                            .or_else(|| v.get("ip"))
                            .and_then(|s| s.as_str())
                            .map(str::to_string)
                    });
                ProbeReport {
                    ok: status.is_success(),
                    status: Some(status.as_u16()),
                    elapsed: started.elapsed().as_secs_f64(),
                    exit_ip,
                }
            }
            Err(_) => ProbeReport {
                ok: false,
                status: None,
                elapsed: started.elapsed().as_secs_f64(),
                exit_ip: None,
            },
        }
    }

    /// Get or build the cached client for `proxy_url`.
    async fn proxied_client(&self, proxy_url: &str) -> Result<reqwest::Client, LookupError> {
        // Fast path: read lock.
        {
            let clients = self.proxied.read().await;
            if let Some(client) = clients.get(proxy_url) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.proxied.write().await;
        // Double-check after acquiring write lock.
        if let Some(client) = clients.get(proxy_url) {
            return Ok(client.clone());
        }

        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| LookupError::Endpoint {
            endpoint: proxy_url.to_string(),
            message: format!("invalid proxy URL: {e}"),
        })?;
        let client = Self::builder(self.timeout).proxy(proxy).build().map_err(|e| {
            LookupError::Endpoint {
                endpoint: proxy_url.to_string(),
                message: format!("client build failed: {e}"),
            }
        })?;

        clients.insert(proxy_url.to_string(), client.clone());
        tracing::debug!(proxy = %proxy_url, cached = clients.len(), "built proxied client");
        Ok(client)
    }

    fn check_cooldown(&self) -> Result<(), LookupError> {
        if self.streak.consecutive.load(Ordering::Relaxed) < self.max_consecutive_errors {
            return Ok(());
        }
        let last = *self.streak.last_at.read();
        if let Some(at) = last {
            let since = at.elapsed();
            if since < self.error_cooldown {
                let retry_in_secs = (self.error_cooldown - since).as_secs().max(1);
                return Err(LookupError::Cooldown { retry_in_secs });
            }
        }
        // Streak is stale, let the next request through.
        self.reset_error_streak();
        Ok(())
    }

    fn record_transport_error(&self) {
        let streak = self.streak.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        *self.streak.last_at.write() = Some(Instant::now());
        if streak >= self.max_consecutive_errors {
            tracing::warn!(streak, "transport error streak reached cooldown threshold");
        }
    }

    fn reset_error_streak(&self) {
        self.streak.consecutive.store(0, Ordering::Relaxed);
        *self.streak.last_at.write() = None;
    }
}

/// Upstream APIs wrap failures as `{"error": {"message": ...}}`; pull that
/// message out of an error response so classification can act on it.
async fn upstream_error_message(response: reqwest::Response) -> String {
    match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> ResilientClient {
        let rate = RateLimitConfig { requests_per_minute: 600, burst: 100 };
        let request = RequestConfig {
            timeout_secs: 5,
            max_consecutive_errors: 2,
            error_cooldown_secs: 300,
        };
        ResilientClient::new(&rate, &request).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "alice",
                "followers": 42,
            })))
            .mount(&server)
            .await;

        let c = client();
        let resp = c.fetch(&format!("{}/p/alice", server.uri()), None).await.unwrap();
        match resp.outcome {
            FetchOutcome::Json(v) => assert_eq!(v["username"], "alice"),
            other => panic!("expected json, got {other:?}"),
        }
        assert_eq!(c.error_streak(), 0);
    }

    #[tokio::test]
    async fn test_fetch_treats_404_as_definitive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let c = client();
        let resp = c.fetch(&format!("{}/p/ghost", server.uri()), None).await.unwrap();
        assert!(matches!(resp.outcome, FetchOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_fetch_rejects_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let c = client();
        let err = c.fetch(&server.uri(), None).await.unwrap_err();
        assert!(matches!(err, LookupError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_server_error_does_not_feed_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "upstream exploded" }
            })))
            .mount(&server)
            .await;

        let c = client();
        let err = c.fetch(&server.uri(), None).await.unwrap_err();
        match err {
            LookupError::UnexpectedStatus { status, message, .. } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected unexpected-status error, got {other:?}"),
        }
        // HTTP errors mean the pipe works; only transport failures count.
        assert_eq!(c.error_streak(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_trips_after_transport_streak() {
        let c = client();
        // Unroutable port, fails at connect.
        let dead = "http://127.0.0.1:1/profile";
        for _ in 0..2 {
            let err = c.fetch(dead, None).await.unwrap_err();
            assert!(matches!(err, LookupError::Transport { .. }));
        }
        assert_eq!(c.error_streak(), 2);

        let err = c.fetch(dead, None).await.unwrap_err();
        match err {
            LookupError::Cooldown { retry_in_secs } => assert!(retry_in_secs > 0),
            other => panic!("expected cooldown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_through_proxy_blames_proxy() {
        let c = client();
        let err = c
            .fetch("http://example.invalid/profile", Some("http://127.0.0.1:1"))
            .await
            .unwrap_err();
        match err {
            LookupError::Endpoint { endpoint, .. } => {
                assert_eq!(endpoint, "http://127.0.0.1:1");
            }
            other => panic!("expected endpoint error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_extracts_exit_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "origin": "203.0.113.7" })),
            )
            .mount(&server)
            .await;

        let c = client();
        let report = c.probe(&server.uri(), None).await;
        assert!(report.ok);
        assert_eq!(report.status, Some(200));
        assert_eq!(report.exit_ip.as_deref(), Some("203.0.113.7"));
    }
}
