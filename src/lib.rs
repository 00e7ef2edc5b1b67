#![allow(clippy::manual_unwrap_or_default)]
#![allow(clippy::manual_unwrap_or)]

pub mod auth;
pub mod backends;
pub mod consumer;
pub mod constants;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod hardening;
pub mod health;
pub mod intent;
pub mod logging;
pub mod main_helper;
pub mod projections;
pub mod protocol;
pub mod redaction;
pub mod routes;
pub mod sidechannel;
pub mod specs;
pub mod streaming;
pub mod suggestion;
pub mod text;
pub mod types;

pub use types::*;

pub use main_helper::{AppState, Args};
