//! HTTP client for the feed provider
//!
//! Token exchange (app-only bearer), recent search, the filtered stream and
//! its rule set. Every call carries the configured `User-Agent`.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::cursor::Cursor;
use super::ndjson::NdjsonDecoder;
use super::{FeedItem, MatchHandler};
use crate::config::{Credentials, FeedConfig, RuleConfig};
use crate::error::{AuthError, RuleError, TransientFeedError};

const TOKEN_PATH: &str = "/oauth2/token";
const SEARCH_PATH: &str = "/1.1/search/tweets.json";
const STREAM_PATH: &str = "/labs/1/tweets/stream/filter";
const RULES_PATH: &str = "/labs/1/tweets/stream/filter/rules";

/// Upper bound for one non-streaming request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Used when a 429 carries no usable reset header
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);
/// Longest silence tolerated on the stream (keep-alives come every ~20s)
const DEFAULT_STREAM_IDLE: Duration = Duration::from_secs(90);

/// Authenticated session (bearer token)
#[derive(Clone)]
pub struct Session {
    bearer: String,
}

impl Session {
    pub fn new(bearer: impl Into<String>) -> Self {
        Self {
            bearer: bearer.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("bearer", &"<redacted>").finish()
    }
}

/// Server-side stream rule as returned by the rules endpoint
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerRule {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    statuses: Vec<FeedItem>,
}

#[derive(Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<ServerRule>,
}

#[derive(Serialize)]
struct DeleteRules<'a> {
    delete: DeleteIds<'a>,
}

#[derive(Serialize)]
struct DeleteIds<'a> {
    ids: Vec<&'a str>,
}

#[derive(Serialize)]
struct AddRules<'a> {
    add: Vec<AddRule<'a>>,
}

#[derive(Serialize)]
struct AddRule<'a> {
    value: &'a str,
    tag: &'a str,
}

/// Feed provider client
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    api_base: String,
    stream_idle: Duration,
}

impl FeedClient {
    /// Create a client for `api_base` (e.g. `https://api.twitter.com`)
    pub fn new(api_base: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            stream_idle: DEFAULT_STREAM_IDLE,
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(&config.api_base, &config.user_agent)?.with_stream_idle(config.stream_idle()))
    }

    /// Drop the stream connection after this long without any bytes
    pub fn with_stream_idle(mut self, idle: Duration) -> Self {
        self.stream_idle = idle;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Exchange the consumer key pair for a bearer token
    pub async fn connect(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        info!("🔑 Requesting bearer token from {}", self.api_base);

        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .basic_auth(&credentials.consumer_key, Some(&credentials.consumer_secret))
            .form(&[("grant_type", "client_credentials")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| AuthError::MalformedResponse)?;
        let bearer = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedResponse)?;

        info!("✅ Authenticated with feed provider");
        Ok(Session::new(bearer))
    }

    /// One recent-search request for `hashtag` newer than `cursor`
    ///
    /// Items come back newest first.
    pub async fn search(
        &self,
        session: &Session,
        hashtag: &str,
        cursor: &Cursor,
    ) -> Result<Vec<FeedItem>, TransientFeedError> {
        let params = search_params(hashtag, cursor);
        debug!("Searching {:?}", params);

        let response = self
            .http
            .get(self.url(SEARCH_PATH))
            .bearer_auth(&session.bearer)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let response = check_status(response, StatusCode::OK).await?;
        let body = response.bytes().await?;
        let parsed: SearchResponse = serde_json::from_slice(&body)?;
        Ok(parsed.statuses)
    }

    /// Open the filtered stream
    pub async fn open_stream(&self, session: &Session) -> Result<ItemStream, TransientFeedError> {
        let response = self
            .http
            .get(self.url(STREAM_PATH))
            .bearer_auth(&session.bearer)
            .send()
            .await?;

        let response = check_status(response, StatusCode::OK).await?;
        info!("📡 Stream connected");
        Ok(ItemStream::new(response.bytes_stream(), self.stream_idle))
    }

    /// Open the stream and hand every item to `handler` until it ends
    ///
    /// Returns `Ok(())` when the peer closes the connection.
    pub async fn stream(
        &self,
        session: &Session,
        handler: &dyn MatchHandler,
    ) -> Result<(), TransientFeedError> {
        let mut items = self.open_stream(session).await?;
        items.dispatch(handler).await
    }

    /// Current server-side rule set
    pub async fn get_rules(&self, session: &Session) -> Result<Vec<ServerRule>, RuleError> {
        let response = self
            .http
            .get(self.url(RULES_PATH))
            .bearer_auth(&session.bearer)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(RuleError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RulesResponse = serde_json::from_str(&body).map_err(|_| RuleError::Fetch {
            status: status.as_u16(),
            body: body.clone(),
        })?;
        Ok(parsed.data)
    }

    /// Delete rules by id (no request when `ids` is empty)
    pub async fn delete_rules(&self, session: &Session, ids: &[&str]) -> Result<(), RuleError> {
        if ids.is_empty() {
            return Ok(());
        }

        let payload = DeleteRules {
            delete: DeleteIds { ids: ids.to_vec() },
        };
        let response = self
            .http
            .post(self.url(RULES_PATH))
            .bearer_auth(&session.bearer)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RuleError::Delete {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Deleted {} rule(s)", ids.len());
        Ok(())
    }

    /// Add rules (no request when `rules` is empty)
    pub async fn add_rules(&self, session: &Session, rules: &[RuleConfig]) -> Result<(), RuleError> {
        if rules.is_empty() {
            return Ok(());
        }

        let payload = AddRules {
            add: rules
                .iter()
                .map(|r| AddRule {
                    value: &r.value,
                    tag: &r.tag,
                })
                .collect(),
        };
        let response = self
            .http
            .post(self.url(RULES_PATH))
            .bearer_auth(&session.bearer)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(RuleError::Create {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Replace the whole server-side rule set: fetch, delete all, add all
    pub async fn replace_rules(&self, session: &Session, rules: &[RuleConfig]) -> Result<(), RuleError> {
        let current = self.get_rules(session).await?;
        let ids: Vec<&str> = current.iter().map(|r| r.id.as_str()).collect();
        self.delete_rules(session, &ids).await?;
        self.add_rules(session, rules).await?;
        info!(
            "📋 Stream rules replaced ({} removed, {} added)",
            ids.len(),
            rules.len()
        );
        Ok(())
    }
}

/// Query parameters for a recent search; `since_id` is omitted until the
/// first match
fn search_params(hashtag: &str, cursor: &Cursor) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", hashtag.to_string()),
        ("result_type", "recent".to_string()),
    ];
    if !cursor.is_initial() {
        params.push(("since_id", cursor.as_str().to_string()));
    }
    params
}

async fn check_status(
    response: reqwest::Response,
    expected: StatusCode,
) -> Result<reqwest::Response, TransientFeedError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = rate_limit_wait(response.headers(), chrono::Utc::now().timestamp());
        return Err(TransientFeedError::RateLimited { retry_after });
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransientFeedError::Status {
        status: status.as_u16(),
        body,
    })
}

/// How long to back off after a 429
///
/// Prefers `x-rate-limit-reset` (epoch seconds), then `retry-after`
/// (seconds), then a fixed default.
fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64) -> Duration {
    let header_num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(reset) = header_num("x-rate-limit-reset") {
        return Duration::from_secs((reset - now_epoch).max(1) as u64);
    }
    if let Some(secs) = header_num("retry-after") {
        return Duration::from_secs(secs.max(1) as u64);
    }
    DEFAULT_RATE_LIMIT_WAIT
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decoded items from an open stream connection
pub struct ItemStream {
    body: ByteStream,
    idle: Duration,
    decoder: NdjsonDecoder,
    ready: VecDeque<FeedItem>,
    done: bool,
}

impl ItemStream {
    fn new(body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static, idle: Duration) -> Self {
        Self {
            body: Box::pin(body),
            idle,
            decoder: NdjsonDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Next item; `None` once the peer closed the connection
    ///
    /// A connection that stays silent for longer than the idle limit yields
    /// [`TransientFeedError::Idle`] and is finished.
    pub async fn next_item(&mut self) -> Option<Result<FeedItem, TransientFeedError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }

            let next = match tokio::time::timeout(self.idle, self.body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.done = true;
                    return Some(Err(TransientFeedError::Idle(self.idle)));
                }
            };

            match next {
                Some(Ok(chunk)) => self.ready.extend(self.decoder.push(&chunk)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Hand every remaining item to `handler`
    pub async fn dispatch(&mut self, handler: &dyn MatchHandler) -> Result<(), TransientFeedError> {
        while let Some(next) = self.next_item().await {
            let item = next?;
            info!("🐦 {}", item);
            if let Err(e) = handler.on_match(&item).await {
                warn!("Match handler failed for item {}: {:#}", item.id, e);
            }
        }
        warn!("🔌 Stream closed by peer");
        Ok(())
    }
}
