//! Error types for the feed watcher and the output controller
//!
//! Startup failures (`AuthError`, `RuleError`) and driver failures
//! (`DriverError`) are fatal. `TransientFeedError` covers a single failed
//! request; the watcher loops log it and carry on.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Credential loading or token exchange failed
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials file not readable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credentials file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("credentials file is missing required key(s): {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),

    #[error("token exchange rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token response did not contain an access_token")]
    MalformedResponse,

    #[error("token request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Server-side rule management failed
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("cannot get rules (HTTP {status}): {body}")]
    Fetch { status: u16, body: String },

    #[error("cannot delete rules (HTTP {status}): {body}")]
    Delete { status: u16, body: String },

    #[error("cannot create rules (HTTP {status}): {body}")]
    Create { status: u16, body: String },

    #[error("rules request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A single feed request failed; never fatal
#[derive(Debug, Error)]
pub enum TransientFeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("stream silent for {}s", .0.as_secs())]
    Idle(Duration),

    #[error("could not decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Output sink misconfiguration or failure
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("output driver unavailable: {0}")]
    Unavailable(String),

    #[error("pin {0} is not a usable output on this header")]
    InvalidPin(u8),

    #[error("pin {0} was written before being configured")]
    NotConfigured(u8),

    #[error("unknown channel group '{0}'")]
    UnknownGroup(String),

    #[error("scene needs two distinct groups, got '{0}' twice")]
    InvalidScene(String),
}
