//! yt-live-notify library crate.
//!
//! Polls YouTube channels for upcoming, live and finished streams, keeps the
//! accumulated state across polls and notifies at most once per video, event
//! and delivery channel.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
