//! Live session registry and named broadcast rooms

use crate::error::Result;
use crate::session::messages::ServerMessage;
use crate::types::SessionId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Delivery surface for live sessions
#[async_trait]
pub trait SessionHub: Send + Sync {
    /// Deliver to one session; `false` when the session is gone
    async fn send_to(&self, session_id: &str, message: &ServerMessage) -> Result<bool>;

    /// Deliver to every session in a room except `except`; returns the number reached
    async fn broadcast(
        &self,
        room: &str,
        message: &ServerMessage,
        except: Option<&str>,
    ) -> Result<usize>;

    async fn join_room(&self, session_id: &str, room: &str) -> Result<()>;

    async fn leave_room(&self, session_id: &str, room: &str) -> Result<()>;
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, mpsc::UnboundedSender<ServerMessage>>,
    rooms: HashMap<String, HashSet<SessionId>>,
}

/// In-process hub: one unbounded channel per connected session
#[derive(Default)]
pub struct InMemorySessionHub {
    state: RwLock<HubState>,
}

impl InMemorySessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and hand back the stream of messages addressed to it
    pub async fn register(&self, session_id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .write()
            .await
            .sessions
            .insert(session_id.to_string(), tx);
        debug!("Session {} registered", session_id);
        rx
    }

    /// Drop a session and its room memberships
    pub async fn unregister(&self, session_id: &str) {
        let mut state = self.state.write().await;
        state.sessions.remove(session_id);
        state.rooms.retain(|_, members| {
            members.remove(session_id);
            !members.is_empty()
        });
        debug!("Session {} unregistered", session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn room_members(&self, room: &str) -> Vec<SessionId> {
        let mut members: Vec<SessionId> = self
            .state
            .read()
            .await
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl SessionHub for InMemorySessionHub {
    async fn send_to(&self, session_id: &str, message: &ServerMessage) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .get(session_id)
            .is_some_and(|tx| tx.send(message.clone()).is_ok()))
    }

    async fn broadcast(
        &self,
        room: &str,
        message: &ServerMessage,
        except: Option<&str>,
    ) -> Result<usize> {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return Ok(0);
        };

        let mut reached = 0;
        for session_id in members {
            if Some(session_id.as_str()) == except {
                continue;
            }
            if let Some(tx) = state.sessions.get(session_id) {
                if tx.send(message.clone()).is_ok() {
                    reached += 1;
                }
            }
        }

        debug!(
            "Broadcast {} to room {} reached {} sessions",
            message.event_name(),
            room,
            reached
        );
        Ok(reached)
    }

    async fn join_room(&self, session_id: &str, room: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(session_id) {
            state
                .rooms
                .entry(room.to_string())
                .or_default()
                .insert(session_id.to_string());
        }
        Ok(())
    }

    async fn leave_room(&self, session_id: &str, room: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(session_id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        Ok(())
    }
}
