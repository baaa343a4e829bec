//! Bracket Room - real-time single-elimination tournaments
//!
//! This crate provides queue and custom-room matchmaking, bracket planning,
//! round-by-round tournament orchestration over AMQP events, and websocket
//! sessions for the waiting and tournament namespaces.

pub mod amqp;
pub mod bracket;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod persistence;
pub mod profile;
pub mod service;
pub mod session;
pub mod store;
pub mod tournament;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{Result, TournamentError};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matchmaking::MatchmakingHandlers;
pub use tournament::TournamentOrchestrator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
