//! Real-time client sessions
//!
//! The hub owns live connections and broadcast rooms, the notifier addresses
//! players through their namespace bindings and the gateway terminates websockets.

pub mod gateway;
pub mod hub;
pub mod messages;
pub mod notifier;

pub use gateway::{router, Endpoint, GatewayState};
pub use hub::{InMemorySessionHub, SessionHub};
pub use messages::{ClientCommand, ServerMessage};
pub use notifier::{custom_room, tournament_room, SessionNotifier};
