//! Feed provider integration
//!
//! [`FeedClient`] speaks HTTP to the provider (token exchange, search,
//! filtered stream, stream rules). [`FeedWatcher`] runs the polling or
//! streaming loop on top of it and hands every match to a [`MatchHandler`].

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

pub mod backoff;
pub mod client;
pub mod cursor;
pub mod ndjson;
pub mod watcher;

pub use backoff::Backoff;
pub use client::{FeedClient, ItemStream, Session};
pub use cursor::Cursor;
pub use watcher::FeedWatcher;

/// Author of a feed item
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FeedUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// One matching post
///
/// Search results carry the id twice, as a number and as `id_str` (the
/// number overflows JavaScript clients); stream records only carry `id`,
/// usually as a string.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(from = "RawItem")]
pub struct FeedItem {
    pub id: String,
    pub created_at: String,
    pub text: String,
    pub user: Option<FeedUser>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    id_str: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    user: Option<FeedUser>,
}

impl From<RawItem> for FeedItem {
    fn from(raw: RawItem) -> Self {
        let id = raw
            .id_str
            .or_else(|| match raw.id {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default();
        Self {
            id,
            created_at: raw.created_at,
            text: raw.text,
            user: raw.user,
        }
    }
}

impl FeedItem {
    /// Creation time rendered in local time, falling back to the raw value
    pub fn created_local(&self) -> String {
        let parsed = chrono::DateTime::parse_from_str(&self.created_at, "%a %b %d %H:%M:%S %z %Y")
            .or_else(|_| chrono::DateTime::parse_from_rfc3339(&self.created_at));
        match parsed {
            Ok(ts) => ts
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            Err(_) => self.created_at.clone(),
        }
    }
}

impl fmt::Display for FeedItem {
    /// `"{created_at} - {name} at {location}"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, location) = match &self.user {
            Some(user) => (
                user.name.as_str(),
                user.location.as_deref().filter(|l| !l.is_empty()).unwrap_or("unknown"),
            ),
            None => ("unknown", "unknown"),
        };
        write!(f, "{} - {} at {}", self.created_local(), name, location)
    }
}

/// Callback invoked by the watcher for every new match
///
/// Errors are logged by the watcher and never stop the loop.
#[async_trait]
pub trait MatchHandler: Send + Sync {
    async fn on_match(&self, item: &FeedItem) -> anyhow::Result<()>;
}
