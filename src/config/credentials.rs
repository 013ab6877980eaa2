//! Feed provider credentials loaded from a local JSON key file

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

use super::FeedMode;
use crate::error::AuthError;

/// Raw key file layout (`keys.json`)
#[derive(Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct KeyFile {
    consumer_key: Option<String>,
    consumer_secret: Option<String>,
    access_token_key: Option<String>,
    access_token_secret: Option<String>,
}

/// Validated credentials
///
/// Both feed modes authenticate with the app-only bearer token obtained from
/// the consumer pair. Poll mode additionally insists on the access token pair
/// being present in the key file, but never sends it.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Checked for presence in poll mode only; not used for requests
    pub access_token_key: Option<String>,
    /// Checked for presence in poll mode only; not used for requests
    pub access_token_secret: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .field("access_token_key", &self.access_token_key.as_ref().map(|_| "<redacted>"))
            .field("access_token_secret", &self.access_token_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Read and validate the key file for the given feed mode
    pub async fn load(path: impl AsRef<Path>, mode: FeedMode) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AuthError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Loaded credentials file {}", path.display());
        Self::from_json(&contents, mode)
    }

    /// Parse and validate key file contents
    pub fn from_json(contents: &str, mode: FeedMode) -> Result<Self, AuthError> {
        let keys: KeyFile = serde_json::from_str(contents)?;

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        let mut required: Vec<(&'static str, bool)> = vec![
            ("CONSUMER_KEY", present(&keys.consumer_key)),
            ("CONSUMER_SECRET", present(&keys.consumer_secret)),
        ];
        if mode == FeedMode::Poll {
            required.push(("ACCESS_TOKEN_KEY", present(&keys.access_token_key)));
            required.push(("ACCESS_TOKEN_SECRET", present(&keys.access_token_secret)));
        }

        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect();
        if !missing.is_empty() {
            return Err(AuthError::MissingKeys(missing));
        }

        Ok(Self {
            consumer_key: keys.consumer_key.unwrap_or_default(),
            consumer_secret: keys.consumer_secret.unwrap_or_default(),
            access_token_key: keys.access_token_key,
            access_token_secret: keys.access_token_secret,
        })
    }
}
