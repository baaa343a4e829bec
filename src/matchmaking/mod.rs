//! Matchmaking: automatic size queues and invite-only custom rooms

pub mod handlers;

pub use handlers::MatchmakingHandlers;
