//! Profile resolution with failover.
//!
//! [`ProfileService`] turns a handle into a [`Verdict`] by trying the
//! privileged discovery API first (when configured) and falling back to the
//! scraped mirror pool with retry-and-failover. Raw JSON payloads, whatever
//! their shape, are normalized into the canonical [`Profile`] record here.

mod account_age;

pub use account_age::estimate_account_age;

/// Canonical handle form: no leading marker, trimmed, lowercase.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use watchtower_types::error::LookupError;
use watchtower_types::models::{
    ApiConfig, AppConfig, GraphApiConfig, Profile, Verdict, FIELD_UNAVAILABLE,
};

use crate::client::{EndpointPool, FetchOutcome, ResilientClient};

/// Maximum bio length kept on the normalized record.
const BIO_LIMIT: usize = 100;

/// One resolved lookup, with enough context to log and score it.
#[derive(Debug)]
pub struct LookupReport {
    pub verdict: Verdict,
    /// The mirror that answered, or "graph" for the privileged path.
    pub endpoint: Option<String>,
    pub response_time: f64,
}

impl LookupReport {
    fn failed(err: LookupError) -> Self {
        Self { verdict: Verdict::Failed(err), endpoint: None, response_time: 0.0 }
    }
}

/// Seam between the scheduler and the resolution machinery.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn lookup(&self, handle: &str, proxy: Option<&str>) -> LookupReport;
}

/// Production lookup path: graph first, then the mirror pool.
pub struct ProfileService {
    client: Arc<ResilientClient>,
    mirrors: EndpointPool,
    api: ApiConfig,
    graph: GraphApiConfig,
}

impl ProfileService {
    pub fn new(client: Arc<ResilientClient>, config: &AppConfig) -> Self {
        Self {
            client,
            mirrors: EndpointPool::new(config.api.mirror_urls.iter().cloned()),
            api: config.api.clone(),
            graph: config.graph.clone(),
        }
    }

    /// The mirror pool, exposed for the endpoint-management surface.
    pub fn mirrors(&self) -> &EndpointPool {
        &self.mirrors
    }

    fn graph_configured(&self) -> bool {
        self.graph.enabled
            && !self.graph.access_token.is_empty()
            && !self.graph.business_account_id.is_empty()
    }

    /// Try the discovery API. `Some` is a definitive verdict; `None` means
    /// the privileged path is unavailable right now and the mirrors should
    /// take over.
    async fn graph_lookup(&self, handle: &str) -> Option<LookupReport> {
        let url = format!(
            "{}/{}?fields=business_discovery.username({}){{{}}}&access_token={}",
            self.graph.base_url.trim_end_matches('/'),
            self.graph.business_account_id,
            handle,
            self.graph.fields.join(","),
            self.graph.access_token,
        );

        match self.client.fetch(&url, None).await {
            Ok(resp) => match resp.outcome {
                FetchOutcome::Json(value) => {
                    let verdict = match value.get("business_discovery") {
                        Some(bd) => match parse_graph_profile(bd, handle) {
                            Some(profile) => Verdict::Found(profile),
                            None => Verdict::NotFound,
                        },
                        // 200 without discovery data means the handle does
                        // not resolve to a queryable account.
                        None => Verdict::NotFound,
                    };
                    Some(LookupReport {
                        verdict,
                        endpoint: Some("graph".to_string()),
                        response_time: resp.elapsed,
                    })
                }
                FetchOutcome::NotFound => Some(LookupReport {
                    verdict: Verdict::NotFound,
                    endpoint: Some("graph".to_string()),
                    response_time: resp.elapsed,
                }),
            },
            // The discovery API answers 400 both for handles that do not
            // exist and for token problems; only the former is an absence.
            Err(LookupError::UnexpectedStatus { endpoint, status: 400, message }) => {
                if graph_message_means_not_found(&message) {
                    Some(LookupReport {
                        verdict: Verdict::NotFound,
                        endpoint: Some("graph".to_string()),
                        response_time: 0.0,
                    })
                } else {
                    Some(LookupReport::failed(LookupError::UnexpectedStatus {
                        endpoint,
                        status: 400,
                        message,
                    }))
                }
            }
            Err(err @ LookupError::Cooldown { .. }) => Some(LookupReport::failed(err)),
            Err(err) => {
                tracing::warn!(%handle, error = %err, "graph lookup failed, falling back to mirrors");
                None
            }
        }
    }

    async fn mirror_lookup(&self, handle: &str, proxy: Option<&str>) -> LookupReport {
        let mut last_error = LookupError::NoEndpoints;

        for attempt in 0..self.api.retry_attempts {
            let Some(mirror) = self.mirrors.choose(self.api.rotation_strategy) else {
                return LookupReport::failed(LookupError::NoEndpoints);
            };
            let url = mirror_url(&mirror, handle);

            match self.client.fetch(&url, proxy).await {
                Ok(resp) => match resp.outcome {
                    FetchOutcome::Json(value) => match parse_mirror_profile(&value, handle) {
                        Some(profile) => {
                            self.mirrors.mark_success(&mirror, resp.elapsed);
                            return LookupReport {
                                verdict: Verdict::Found(profile),
                                endpoint: Some(mirror),
                                response_time: resp.elapsed,
                            };
                        }
                        None => {
                            self.mirrors.mark_failure(&mirror);
                            last_error = LookupError::InvalidResponse {
                                endpoint: mirror.clone(),
                                message: "no recognizable profile payload".to_string(),
                            };
                        }
                    },
                    FetchOutcome::NotFound => {
                        // Definitive. The mirror still eats a failure mark so
                        // a pair blocked into permanent 404s decays.
                        self.mirrors.mark_failure(&mirror);
                        return LookupReport {
                            verdict: Verdict::NotFound,
                            endpoint: Some(mirror),
                            response_time: resp.elapsed,
                        };
                    }
                },
                Err(err @ LookupError::Cooldown { .. }) => {
                    // Breaker open, retrying would just spin.
                    return LookupReport::failed(err);
                }
                Err(err) => {
                    tracing::debug!(
                        %handle,
                        mirror = %mirror,
                        attempt,
                        error = %err,
                        "mirror lookup attempt failed"
                    );
                    self.mirrors.mark_failure(&mirror);
                    last_error = err;
                }
            }

            if attempt + 1 < self.api.retry_attempts {
                let backoff = self.api.retry_delay_secs * 2u64.pow(attempt);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        LookupReport::failed(last_error)
    }
}

#[async_trait]
impl ProfileLookup for ProfileService {
    async fn lookup(&self, handle: &str, proxy: Option<&str>) -> LookupReport {
        let handle = normalize_handle(handle);
        if self.graph_configured() {
            if let Some(report) = self.graph_lookup(&handle).await {
                return report;
            }
        }
        self.mirror_lookup(&handle, proxy).await
    }
}

/// Discovery error messages that mean the handle resolves to nothing, as
/// opposed to a credential or request problem.
fn graph_message_means_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    ["no data found", "cannot find", "unsupported get request"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// Build the concrete request URL for a mirror.
///
/// A `{handle}` placeholder is substituted in place; otherwise the handle is
/// appended as a path segment.
fn mirror_url(base: &str, handle: &str) -> String {
    if base.contains("{handle}") {
        base.replace("{handle}", handle)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), handle)
    }
}

/// Normalize a scraped payload. Mirrors disagree on nesting, so the profile
/// object is searched for at the usual depths.
fn parse_mirror_profile(value: &serde_json::Value, handle: &str) -> Option<Profile> {
    let user = [
        value.pointer("/data/user"),
        value.pointer("/graphql/user"),
        value.get("user"),
        Some(value),
    ]
    .into_iter()
    .flatten()
    .find(|v| v.get("username").is_some())?;

    let numeric_id = string_field(user, &["id", "pk"]);
    Some(Profile {
        handle: user
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or(handle)
            .to_string(),
        display_name: text_field(user, &["full_name", "name"]),
        account_age: estimate_account_age(&numeric_id),
        numeric_id,
        followers: count_field(user, &["follower_count", "followers"], "/edge_followed_by/count"),
        following: count_field(user, &["following_count", "following"], "/edge_follow/count"),
        posts: count_field(user, &["media_count", "posts"], "/edge_owner_to_timeline_media/count"),
        is_private: bool_field(user, "is_private"),
        is_verified: bool_field(user, "is_verified"),
        bio: truncate_bio(&text_field(user, &["biography", "bio"])),
    })
}

/// Normalize a `business_discovery` payload from the privileged path.
fn parse_graph_profile(bd: &serde_json::Value, handle: &str) -> Option<Profile> {
    bd.get("username")?;
    let numeric_id = string_field(bd, &["id"]);
    Some(Profile {
        handle: bd.get("username").and_then(|v| v.as_str()).unwrap_or(handle).to_string(),
        display_name: text_field(bd, &["name"]),
        account_age: estimate_account_age(&numeric_id),
        numeric_id,
        followers: count_field(bd, &["followers_count"], ""),
        following: count_field(bd, &["follows_count"], ""),
        posts: count_field(bd, &["media_count"], ""),
        // Discovery only resolves public business accounts.
        is_private: false,
        is_verified: bool_field(bd, "is_verified"),
        bio: truncate_bio(&text_field(bd, &["biography"])),
    })
}

fn text_field(v: &serde_json::Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| v.get(k).and_then(|x| x.as_str()))
        .filter(|s| !s.is_empty())
        .map_or_else(|| FIELD_UNAVAILABLE.to_string(), str::to_string)
}

/// Id fields arrive as either a number or a string depending on the source.
fn string_field(v: &serde_json::Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| v.get(k))
        .map_or_else(
            || FIELD_UNAVAILABLE.to_string(),
            |x| match x {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        )
}

fn count_field(v: &serde_json::Value, keys: &[&str], nested: &str) -> String {
    let raw = keys
        .iter()
        .find_map(|k| v.get(k))
        .or_else(|| if nested.is_empty() { None } else { v.pointer(nested) });
    match raw.and_then(serde_json::Value::as_u64) {
        Some(n) => watchtower_types::models::format_count(&n.to_string()),
        None => FIELD_UNAVAILABLE.to_string(),
    }
}

fn bool_field(v: &serde_json::Value, key: &str) -> bool {
    v.get(key).and_then(serde_json::Value::as_bool).unwrap_or(false)
}

fn truncate_bio(bio: &str) -> String {
    if bio == FIELD_UNAVAILABLE {
        return bio.to_string();
    }
    let flat = bio.replace('\n', " ");
    if flat.chars().count() > BIO_LIMIT {
        let cut: String = flat.chars().take(BIO_LIMIT).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
