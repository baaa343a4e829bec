//! Durable tournament storage

pub mod repository;

pub use repository::{
    CreatedTournament, InMemoryTournamentRepository, MatchRecord, NewTournament,
    RecordedResult, TournamentRecord, TournamentRepository,
};
