//! Error types for the tournament service
//!
//! Operations return `anyhow::Result` carrying a typed [`TournamentError`] so the
//! transport layers can classify failures without knowing every call site.

use crate::types::{MatchId, PlayerId, RoomId, TournamentId};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Coarse failure taxonomy shared by the event consumer and the session gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed payload, rejected before any mutation and never retried
    Validation,
    /// The request conflicts with current state; user visible, not retried
    StateConflict,
    /// A tournament, match, room or session does not exist
    NotFound,
    /// Store, event log or profile service failure
    Collaborator,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Collaborator => "collaborator",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for specific tournament and matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Room is full: {room_id}")]
    RoomFull { room_id: RoomId },

    #[error("Player {player_id} is not invited to room {room_id}")]
    NotInvited { room_id: RoomId, player_id: PlayerId },

    #[error("Player {player_id} is already in room {room_id}")]
    AlreadyInRoom { room_id: RoomId, player_id: PlayerId },

    #[error("Player {player_id} is not the host of room {room_id}")]
    NotHost { room_id: RoomId, player_id: PlayerId },

    #[error("Room {room_id} has {current} of {required} players")]
    RoomNotFull {
        room_id: RoomId,
        current: usize,
        required: usize,
    },

    #[error("Player {player_id} is already waiting in the queue for size {size}")]
    AlreadyQueued { player_id: PlayerId, size: u32 },

    #[error("Not enough players in queue {size}: need {size}, have {available}")]
    QueueUnderflow { size: u32, available: usize },

    #[error("Player {player_id} is not an active player in tournament {tournament_id}")]
    NotActive {
        tournament_id: TournamentId,
        player_id: PlayerId,
    },

    #[error("Player {player_id} is not registered in tournament {tournament_id}")]
    PlayerNotRegistered {
        tournament_id: TournamentId,
        player_id: PlayerId,
    },

    #[error("Player {player_id} is still playing in tournament {tournament_id}")]
    StillPlaying {
        tournament_id: TournamentId,
        player_id: PlayerId,
    },

    #[error("Player {player_id} is not playing in tournament {tournament_id}")]
    NotPlaying {
        tournament_id: TournamentId,
        player_id: PlayerId,
    },

    #[error("Not all players are ready in tournament {tournament_id}")]
    PlayersNotReady { tournament_id: TournamentId },

    #[error("Match {match_id} is missing players")]
    MatchMissingPlayers { match_id: MatchId },

    #[error("Match {match_id} has already been resolved")]
    MatchAlreadyResolved { match_id: MatchId },

    #[error("Match {match_id} has not been started")]
    MatchNotInProgress { match_id: MatchId },

    #[error("Tournament request {request_id} is already being processed")]
    RequestInFlight { request_id: String },

    #[error("Tournament {tournament_id} already exists")]
    TournamentAlreadyExists { tournament_id: TournamentId },

    #[error("Tournament {tournament_id} is already finished")]
    TournamentFinished { tournament_id: TournamentId },

    #[error("Tournament not found: {tournament_id}")]
    TournamentNotFound { tournament_id: TournamentId },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: MatchId },

    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: RoomId },

    #[error("Session not found for player {player_id} in namespace {namespace}")]
    SessionNotFound { namespace: String, player_id: PlayerId },

    #[error("No match servers available")]
    NoMatchServer,

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Profile service request failed: {message}")]
    ProfileServiceFailed { message: String },

    #[error("Session transport error: {message}")]
    Transport { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl TournamentError {
    /// Classify this error into the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        use TournamentError::*;
        match self {
            InvalidPayload { .. } | ConfigurationError { .. } => ErrorKind::Validation,
            RoomFull { .. }
            | NotInvited { .. }
            | AlreadyInRoom { .. }
            | NotHost { .. }
            | RoomNotFull { .. }
            | AlreadyQueued { .. }
            | QueueUnderflow { .. }
            | NotActive { .. }
            | PlayerNotRegistered { .. }
            | StillPlaying { .. }
            | NotPlaying { .. }
            | PlayersNotReady { .. }
            | MatchMissingPlayers { .. }
            | MatchAlreadyResolved { .. }
            | MatchNotInProgress { .. }
            | RequestInFlight { .. }
            | TournamentAlreadyExists { .. }
            | TournamentFinished { .. } => ErrorKind::StateConflict,
            TournamentNotFound { .. }
            | MatchNotFound { .. }
            | RoomNotFound { .. }
            | SessionNotFound { .. }
            | NoMatchServer => ErrorKind::NotFound,
            Store { .. }
            | AmqpConnectionFailed { .. }
            | ProfileServiceFailed { .. }
            | Transport { .. }
            | InternalError { .. } => ErrorKind::Collaborator,
        }
    }

    /// Shorthand for building a validation error
    pub fn invalid(reason: impl Into<String>) -> Self {
        TournamentError::InvalidPayload {
            reason: reason.into(),
        }
    }
}

/// Classify an arbitrary error; anything that is not a [`TournamentError`] is
/// treated as a collaborator failure.
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    error
        .downcast_ref::<TournamentError>()
        .map(TournamentError::kind)
        .unwrap_or(ErrorKind::Collaborator)
}

/// Returns the typed error carried by an `anyhow::Error`, if any
pub fn as_tournament_error(error: &anyhow::Error) -> Option<&TournamentError> {
    error.downcast_ref::<TournamentError>()
}
