//! Player-addressed delivery on top of session bindings and the hub

use crate::error::Result;
use crate::session::hub::SessionHub;
use crate::session::messages::ServerMessage;
use crate::store::{Namespace, SessionStore};
use crate::types::{PlayerId, RoomId, TournamentId};
use std::sync::Arc;
use tracing::warn;

/// Broadcast room of a tournament's sessions
pub fn tournament_room(tournament_id: TournamentId) -> String {
    format!("tournament:{}", tournament_id)
}

/// Broadcast room of a custom waiting room's sessions
pub fn custom_room(room_id: RoomId) -> String {
    format!("custom:{}", room_id)
}

#[derive(Clone)]
pub struct SessionNotifier {
    sessions: SessionStore,
    hub: Arc<dyn SessionHub>,
}

impl SessionNotifier {
    pub fn new(sessions: SessionStore, hub: Arc<dyn SessionHub>) -> Self {
        Self { sessions, hub }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Send to the player's current session in `namespace`. A player without a live
    /// session is logged and skipped.
    pub async fn send_to_player(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
        message: &ServerMessage,
    ) -> Result<bool> {
        let Some(session_id) = self.sessions.session_of(namespace, player_id).await? else {
            warn!(
                "No {} session for player {}; skipping {}",
                namespace,
                player_id,
                message.event_name()
            );
            return Ok(false);
        };

        let delivered = self.hub.send_to(&session_id, message).await?;
        if !delivered {
            warn!(
                "Session {} of player {} is gone; skipping {}",
                session_id,
                player_id,
                message.event_name()
            );
        }
        Ok(delivered)
    }

    /// Put the player's session in `namespace` into a broadcast room
    pub async fn join_player_to_room(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
        room: &str,
    ) -> Result<bool> {
        match self.sessions.session_of(namespace, player_id).await? {
            Some(session_id) => {
                self.hub.join_room(&session_id, room).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn remove_player_from_room(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
        room: &str,
    ) -> Result<()> {
        if let Some(session_id) = self.sessions.session_of(namespace, player_id).await? {
            self.hub.leave_room(&session_id, room).await?;
        }
        Ok(())
    }

    pub async fn broadcast(&self, room: &str, message: &ServerMessage) -> Result<usize> {
        self.hub.broadcast(room, message, None).await
    }

    /// Broadcast to a room, leaving out one player's session
    pub async fn broadcast_except(
        &self,
        room: &str,
        namespace: Namespace,
        except: PlayerId,
        message: &ServerMessage,
    ) -> Result<usize> {
        let session = self.sessions.session_of(namespace, except).await?;
        self.hub.broadcast(room, message, session.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::hub::InMemorySessionHub;
    use crate::session::messages::LeaveSuccess;
    use crate::store::{SharedStore, DEFAULT_SESSION_TTL};

    fn message() -> ServerMessage {
        ServerMessage::LeaveSuccess(LeaveSuccess {
            message: "ok".to_string(),
        })
    }

    #[tokio::test]
    async fn test_send_to_bound_player() {
        let hub = Arc::new(InMemorySessionHub::new());
        let sessions = SessionStore::new(SharedStore::new(), DEFAULT_SESSION_TTL);
        let notifier = SessionNotifier::new(sessions.clone(), hub.clone());

        let mut rx = hub.register("s1").await;
        sessions.bind(Namespace::Waiting, 7, "s1").await.unwrap();

        assert!(notifier
            .send_to_player(Namespace::Waiting, 7, &message())
            .await
            .unwrap());
        assert!(!notifier
            .send_to_player(Namespace::Tournament, 7, &message())
            .await
            .unwrap());
        assert_eq!(rx.recv().await, Some(message()));
    }

    #[tokio::test]
    async fn test_room_broadcast_except() {
        let hub = Arc::new(InMemorySessionHub::new());
        let sessions = SessionStore::new(SharedStore::new(), DEFAULT_SESSION_TTL);
        let notifier = SessionNotifier::new(sessions.clone(), hub.clone());

        let _rx1 = hub.register("s1").await;
        let mut rx2 = hub.register("s2").await;
        sessions.bind(Namespace::Tournament, 1, "s1").await.unwrap();
        sessions.bind(Namespace::Tournament, 2, "s2").await.unwrap();

        let room = tournament_room(9);
        notifier
            .join_player_to_room(Namespace::Tournament, 1, &room)
            .await
            .unwrap();
        notifier
            .join_player_to_room(Namespace::Tournament, 2, &room)
            .await
            .unwrap();

        let reached = notifier
            .broadcast_except(&room, Namespace::Tournament, 1, &message())
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert_eq!(rx2.recv().await, Some(message()));
        assert_eq!(notifier.broadcast(&room, &message()).await.unwrap(), 2);
    }
}
