//! Realtime notification agent for the TaskDesk employee dashboard.
//!
//! One [`session::RealtimeSession`] per logged-in user holds the socket connection and
//! the [`hub::NotificationHub`] that dedupes inbound events and fans them out to the
//! toast stack, the audio cue and desktop notifications.

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod console;
pub mod desktop;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod preferences;
pub mod router;
pub mod session;
pub mod toast;
pub mod wire;
