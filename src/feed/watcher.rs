//! Polling and streaming loops
//!
//! Both loops run until the shutdown future resolves. Failed requests are
//! logged and retried; nothing in here is fatal.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Backoff, Cursor, FeedClient, FeedItem, MatchHandler, Session};
use crate::config::FeedConfig;
use crate::error::TransientFeedError;

/// Drives a [`FeedClient`] and forwards new matches to a [`MatchHandler`]
pub struct FeedWatcher {
    client: FeedClient,
    session: Session,
    hashtag: String,
    poll_interval: Duration,
    cursor: Cursor,
    backoff: Backoff,
}

impl FeedWatcher {
    pub fn new(client: FeedClient, session: Session, config: &FeedConfig) -> Self {
        Self {
            client,
            session,
            hashtag: config.query_hashtag(),
            poll_interval: config.poll_interval(),
            cursor: Cursor::new(),
            backoff: Backoff::from(&config.backoff),
        }
    }

    /// Resume polling after a known item id
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    async fn search(&self) -> Result<Vec<FeedItem>, TransientFeedError> {
        self.client
            .search(&self.session, &self.hashtag, &self.cursor)
            .await
    }

    fn report(&self, e: &TransientFeedError) {
        warn!("Search for {} failed: {}", self.hashtag, e);
    }

    /// One search with the current cursor; failures are logged and yield nothing
    pub async fn poll(&self) -> Vec<FeedItem> {
        self.search().await.unwrap_or_else(|e| {
            self.report(&e);
            Vec::new()
        })
    }

    /// One polling iteration; returns how long to wait before the next one
    pub async fn poll_once(&mut self, handler: &dyn MatchHandler) -> Duration {
        let items = match self.search().await {
            Ok(items) => items,
            Err(TransientFeedError::RateLimited { retry_after }) => {
                warn!("⏳ Search rate limited, waiting {:?}", retry_after);
                return retry_after;
            }
            Err(e) => {
                self.report(&e);
                return self.poll_interval;
            }
        };

        let Some(newest) = items.first() else {
            return self.poll_interval;
        };

        if !self.cursor.advance(&newest.id) {
            debug!("Newest item {} already seen (cursor {})", newest.id, self.cursor);
            return self.poll_interval;
        }

        info!("🐦 {} ({} new)", newest, items.len());
        if let Err(e) = handler.on_match(newest).await {
            warn!("Match handler failed for item {}: {:#}", newest.id, e);
        }
        self.poll_interval
    }

    /// Poll forever (until `shutdown`)
    pub async fn run_polling(
        &mut self,
        handler: &dyn MatchHandler,
        shutdown: impl Future<Output = ()>,
    ) {
        info!(
            "🔎 Polling for {} every {:?}",
            self.hashtag, self.poll_interval
        );
        tokio::pin!(shutdown);

        loop {
            let wait = tokio::select! {
                wait = self.poll_once(handler) => wait,
                _ = &mut shutdown => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => break,
            }
        }

        info!("Polling stopped (cursor {})", self.cursor);
    }

    /// Stream forever (until `shutdown`), reconnecting with backoff
    pub async fn run_streaming(
        &mut self,
        handler: &dyn MatchHandler,
        shutdown: impl Future<Output = ()>,
    ) {
        info!("📡 Streaming filtered matches");
        tokio::pin!(shutdown);

        loop {
            let mut floor = Duration::ZERO;
            let cycle = async {
                match self.client.open_stream(&self.session).await {
                    Ok(mut items) => {
                        self.backoff.reset();
                        if let Err(e) = items.dispatch(handler).await {
                            warn!("🔌 Stream failed: {}", e);
                        }
                    }
                    Err(TransientFeedError::RateLimited { retry_after }) => {
                        warn!("Stream connect rate limited for {:?}", retry_after);
                        floor = retry_after;
                    }
                    Err(e) => warn!("Stream connect failed: {}", e),
                }
            };

            tokio::select! {
                _ = cycle => {}
                _ = &mut shutdown => break,
            }

            let delay = self.backoff.next_delay().max(floor);
            info!(
                "⏳ Reconnecting in {:?} (attempt {})",
                delay,
                self.backoff.attempt()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => break,
            }
        }

        info!("Streaming stopped");
    }
}
