//! hashtag-lights
//!
//! Watches a social feed for a hashtag and switches relay-driven lights when
//! a new post matches.

pub mod actions;
pub mod app;
pub mod config;
pub mod error;
pub mod feed;
pub mod output;
pub mod paths;
