//! Shared store and the typed stores layered on top of it
//!
//! Each typed store is the only writer of its own keys.

pub mod keyspace;
pub mod match_server;
pub mod player_state;
pub mod profile;
pub mod queue;
pub mod request_ledger;
pub mod room;
pub mod round_state;
pub mod session;

pub use keyspace::{SharedStore, Transaction};
pub use match_server::{MatchServer, MatchServerRegistry};
pub use player_state::{PlayerStateStore, DEFAULT_TOURNAMENT_TTL};
pub use profile::{ProfileCache, DEFAULT_PROFILE_TTL};
pub use queue::QueueStore;
pub use request_ledger::{RequestClaim, RequestLedger};
pub use room::{LeaveOutcome, RoomInfo, RoomStore, DEFAULT_ROOM_TTL};
pub use round_state::{RoundAdvance, RoundInfo, RoundStateStore, TournamentMeta};
pub use session::{Namespace, SessionStore, DEFAULT_SESSION_TTL};
