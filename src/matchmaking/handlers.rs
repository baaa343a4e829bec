//! Waiting-namespace commands: automatic queues and custom rooms

use crate::amqp::messages::TournamentRequested;
use crate::amqp::publisher::EventPublisher;
use crate::error::{as_tournament_error, Result, TournamentError};
use crate::metrics::MetricsCollector;
use crate::profile::ProfileDirectory;
use crate::session::messages::{
    CustomCreated, CustomInvitation, LeaveSuccess, ServerMessage, WaitingRoomUpdate,
};
use crate::session::notifier::{custom_room, SessionNotifier};
use crate::store::{LeaveOutcome, Namespace, QueueStore, RoomInfo, RoomStore};
use crate::types::{PlayerId, PlayerProfile, RoomId, TournamentMode, TournamentSize};
use crate::utils::{current_timestamp, generate_request_id};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct MatchmakingHandlers {
    queue: QueueStore,
    rooms: RoomStore,
    profiles: ProfileDirectory,
    event_publisher: Arc<dyn EventPublisher>,
    notifier: SessionNotifier,
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchmakingHandlers {
    pub fn new(
        queue: QueueStore,
        rooms: RoomStore,
        profiles: ProfileDirectory,
        event_publisher: Arc<dyn EventPublisher>,
        notifier: SessionNotifier,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(
            queue,
            rooms,
            profiles,
            event_publisher,
            notifier,
            metrics_collector,
        )
    }

    pub fn with_metrics(
        queue: QueueStore,
        rooms: RoomStore,
        profiles: ProfileDirectory,
        event_publisher: Arc<dyn EventPublisher>,
        notifier: SessionNotifier,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue,
            rooms,
            profiles,
            event_publisher,
            notifier,
            metrics_collector,
        }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    /// Queue a player; the player completing a cohort triggers the tournament request
    pub async fn auto_join(&self, player_id: PlayerId, size: TournamentSize) -> Result<()> {
        let waiting = self.queue.enqueue_unique(size, player_id).await?;
        self.metrics_collector.update_queue_length(size, waiting);
        info!(
            "Player {} joined the size {} queue ({} waiting)",
            player_id, size, waiting
        );

        if waiting >= size.players() as usize {
            match self.queue.drain(size).await {
                Ok(players) => {
                    self.request_tournament(players, TournamentMode::Auto, size)
                        .await?
                }
                Err(e) => match as_tournament_error(&e) {
                    // A concurrent join already took the cohort
                    Some(TournamentError::QueueUnderflow { .. }) => {
                        debug!("Queue {} already drained", size)
                    }
                    _ => return Err(e),
                },
            }
        }

        self.send_queue_updates(size).await
    }

    /// Leave one queue. Leaving a queue the player is not in does nothing.
    pub async fn auto_leave(&self, player_id: PlayerId, size: TournamentSize) -> Result<()> {
        if !self.queue.remove(size, player_id).await? {
            debug!("Player {} was not queued for size {}", player_id, size);
            return Ok(());
        }

        self.notifier
            .send_to_player(
                Namespace::Waiting,
                player_id,
                &ServerMessage::LeaveSuccess(LeaveSuccess {
                    message: format!("Left the size {} queue", size),
                }),
            )
            .await?;
        self.send_queue_updates(size).await
    }

    /// Remove a player from every queue; returns how many queues they left
    pub async fn leave_all_auto(&self, player_id: PlayerId) -> Result<usize> {
        let mut left = 0;
        for size in TournamentSize::ALL {
            if self.queue.remove(size, player_id).await? {
                left += 1;
                self.send_queue_updates(size).await?;
            }
        }
        if left > 0 {
            info!("Player {} left {} queues", player_id, left);
        }
        Ok(left)
    }

    /// Every queued player sees the queue with everyone else masked
    async fn send_queue_updates(&self, size: TournamentSize) -> Result<()> {
        let queued = self.queue.players(size).await?;
        self.metrics_collector.update_queue_length(size, queued.len());

        for viewer in &queued {
            let own = self.profiles.resolve(*viewer).await;
            let users = queued
                .iter()
                .map(|id| {
                    if id == viewer {
                        own.clone()
                    } else {
                        PlayerProfile::placeholder(0)
                    }
                })
                .collect();

            self.notifier
                .send_to_player(
                    Namespace::Waiting,
                    *viewer,
                    &ServerMessage::WaitingRoomUpdate(WaitingRoomUpdate {
                        room_id: None,
                        tournament_size: Some(size),
                        host_id: None,
                        users,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn request_tournament(
        &self,
        players: Vec<PlayerId>,
        mode: TournamentMode,
        size: TournamentSize,
    ) -> Result<()> {
        info!("{} cohort of size {} complete: {:?}", mode, size, players);

        let published = self
            .event_publisher
            .publish_tournament_requested(TournamentRequested {
                request_id: generate_request_id(),
                players,
                mode,
                size,
                timestamp: current_timestamp(),
            })
            .await;
        self.metrics_collector
            .record_event_published("TournamentRequested", published.is_ok());
        published?;

        self.metrics_collector.record_cohort_formed(mode, size);
        Ok(())
    }

    /// Open a custom room hosted by the player
    pub async fn custom_create(&self, player_id: PlayerId, size: TournamentSize) -> Result<RoomId> {
        let room_id = self.rooms.create(player_id, size).await?;
        self.notifier
            .join_player_to_room(Namespace::Waiting, player_id, &custom_room(room_id))
            .await?;
        self.notifier
            .send_to_player(
                Namespace::Waiting,
                player_id,
                &ServerMessage::CustomCreate(CustomCreated {
                    room_id,
                    tournament_size: size,
                }),
            )
            .await?;

        self.metrics_collector.record_custom_room_created();
        info!("Player {} opened custom room {} (size {})", player_id, room_id, size);
        Ok(room_id)
    }

    pub async fn custom_invite(
        &self,
        player_id: PlayerId,
        room_id: RoomId,
        invitee: PlayerId,
    ) -> Result<()> {
        let info = self.rooms.info(room_id).await?;
        if info.host != player_id {
            return Err(TournamentError::NotHost { room_id, player_id }.into());
        }

        self.rooms.invite(room_id, invitee).await?;
        let delivered = self
            .notifier
            .send_to_player(
                Namespace::Waiting,
                invitee,
                &ServerMessage::CustomInvite(CustomInvitation {
                    room_id,
                    host_id: player_id,
                }),
            )
            .await?;

        info!(
            "Player {} invited to room {} (delivered: {})",
            invitee, room_id, delivered
        );
        Ok(())
    }

    /// Take a seat in a room the player was invited to
    pub async fn custom_accept(&self, player_id: PlayerId, room_id: RoomId) -> Result<()> {
        let info = self.rooms.join(room_id, player_id).await?;
        self.notifier
            .join_player_to_room(Namespace::Waiting, player_id, &custom_room(room_id))
            .await?;
        self.broadcast_room(&info).await
    }

    /// Start the room's tournament with a shuffled roster.
    ///
    /// The room is removed before the request is published, so a repeated or
    /// racing start gets `RoomNotFound`.
    pub async fn custom_start(&self, player_id: PlayerId, room_id: RoomId) -> Result<()> {
        let info = self.rooms.take_for_start(room_id, player_id).await?;

        let hub_room = custom_room(room_id);
        for member in &info.members {
            self.notifier
                .remove_player_from_room(Namespace::Waiting, *member, &hub_room)
                .await?;
        }

        let mut players = info.members.clone();
        players.shuffle(&mut rand::rng());
        self.request_tournament(players, TournamentMode::Custom, info.size)
            .await
    }

    /// Leave the player's custom room, if any
    pub async fn custom_leave(&self, player_id: PlayerId) -> Result<Option<LeaveOutcome>> {
        let outcome = self.leave_room(player_id).await?;
        if outcome.is_some() {
            self.notifier
                .send_to_player(
                    Namespace::Waiting,
                    player_id,
                    &ServerMessage::LeaveSuccess(LeaveSuccess {
                        message: "Left the custom room".to_string(),
                    }),
                )
                .await?;
        }
        Ok(outcome)
    }

    async fn leave_room(&self, player_id: PlayerId) -> Result<Option<LeaveOutcome>> {
        let Some(outcome) = self.rooms.leave(player_id).await? else {
            return Ok(None);
        };

        self.notifier
            .remove_player_from_room(
                Namespace::Waiting,
                player_id,
                &custom_room(outcome.room_id),
            )
            .await?;

        if !outcome.deleted {
            let info = self.rooms.info(outcome.room_id).await?;
            self.broadcast_room(&info).await?;
        }
        Ok(Some(outcome))
    }

    /// Clean up after a waiting session closed
    pub async fn disconnected(&self, player_id: PlayerId) -> Result<()> {
        self.leave_all_auto(player_id).await?;
        self.leave_room(player_id).await?;
        debug!("Cleaned up waiting state of player {}", player_id);
        Ok(())
    }

    async fn broadcast_room(&self, info: &RoomInfo) -> Result<()> {
        let users = self.profiles.resolve_many(&info.members).await;
        let reached = self
            .notifier
            .broadcast(
                &custom_room(info.room_id),
                &ServerMessage::WaitingRoomUpdate(WaitingRoomUpdate {
                    room_id: Some(info.room_id),
                    tournament_size: Some(info.size),
                    host_id: Some(info.host),
                    users,
                }),
            )
            .await?;
        debug!("Room {} update reached {} sessions", info.room_id, reached);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::profile::client::MockProfileService;
    use crate::session::hub::InMemorySessionHub;
    use crate::store::{
        ProfileCache, SessionStore, SharedStore, DEFAULT_PROFILE_TTL, DEFAULT_ROOM_TTL,
        DEFAULT_SESSION_TTL,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        handlers: MatchmakingHandlers,
        publisher: Arc<MockEventPublisher>,
        hub: Arc<InMemorySessionHub>,
        sessions: SessionStore,
    }

    impl Harness {
        async fn connect(&self, player_id: PlayerId) -> UnboundedReceiver<ServerMessage> {
            let session_id = format!("waiting-{}", player_id);
            let rx = self.hub.register(&session_id).await;
            self.sessions
                .bind(Namespace::Waiting, player_id, &session_id)
                .await
                .unwrap();
            rx
        }
    }

    fn create_test_handlers() -> Harness {
        let store = SharedStore::new();
        let publisher = Arc::new(MockEventPublisher::new());
        let hub = Arc::new(InMemorySessionHub::new());
        let sessions = SessionStore::new(store.clone(), DEFAULT_SESSION_TTL);

        let mut service = MockProfileService::new();
        service.expect_fetch_profile().returning(|id| {
            Ok(PlayerProfile {
                id,
                nickname: format!("player{}", id),
                avatar_url: format!("https://cdn/{}.png", id),
            })
        });

        let handlers = MatchmakingHandlers::new(
            QueueStore::new(store.clone()),
            RoomStore::new(store.clone(), DEFAULT_ROOM_TTL),
            ProfileDirectory::new(
                Arc::new(service),
                ProfileCache::new(store.clone(), DEFAULT_PROFILE_TTL),
            ),
            publisher.clone(),
            SessionNotifier::new(sessions.clone(), hub.clone()),
        );

        Harness {
            handlers,
            publisher,
            hub,
            sessions,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn last_update(messages: &[ServerMessage]) -> &WaitingRoomUpdate {
        messages
            .iter()
            .rev()
            .find_map(|message| match message {
                ServerMessage::WaitingRoomUpdate(update) => Some(update),
                _ => None,
            })
            .expect("no waiting-room-update received")
    }

    #[tokio::test]
    async fn test_auto_join_masks_other_players() {
        let h = create_test_handlers();
        let mut rx1 = h.connect(1).await;
        let _rx2 = h.connect(2).await;

        h.handlers.auto_join(1, TournamentSize::Four).await.unwrap();
        h.handlers.auto_join(2, TournamentSize::Four).await.unwrap();

        let messages = drain(&mut rx1);
        let update = last_update(&messages);
        assert_eq!(update.users.len(), 2);
        assert_eq!(update.users[0].nickname, "player1");
        assert_eq!(update.users[1], PlayerProfile::placeholder(0));
        assert!(h.publisher.tournament_requests().is_empty());
    }

    #[tokio::test]
    async fn test_auto_join_rejects_double_queue() {
        let h = create_test_handlers();
        h.handlers.auto_join(1, TournamentSize::Two).await.unwrap();

        let error = h
            .handlers
            .auto_join(1, TournamentSize::Two)
            .await
            .unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::AlreadyQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_cohort_is_requested_in_fifo_order() {
        let h = create_test_handlers();
        for player in [7, 3, 9, 1, 5] {
            h.handlers.auto_join(player, TournamentSize::Four).await.unwrap();
        }

        let requests = h.publisher.tournament_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].players, vec![7, 3, 9, 1]);
        assert_eq!(requests[0].mode, TournamentMode::Auto);
        assert_eq!(
            h.handlers.queue().players(TournamentSize::Four).await.unwrap(),
            vec![5]
        );
    }

    #[tokio::test]
    async fn test_auto_leave() {
        let h = create_test_handlers();
        let mut rx = h.connect(1).await;

        // Not queued: nothing happens
        h.handlers.auto_leave(1, TournamentSize::Two).await.unwrap();
        assert!(drain(&mut rx).is_empty());

        h.handlers.auto_join(1, TournamentSize::Two).await.unwrap();
        h.handlers.auto_join(1, TournamentSize::Eight).await.unwrap();
        drain(&mut rx);

        h.handlers.auto_leave(1, TournamentSize::Two).await.unwrap();
        assert!(matches!(
            drain(&mut rx).first(),
            Some(ServerMessage::LeaveSuccess(_))
        ));
        assert!(h.handlers.queue().is_queued(TournamentSize::Eight, 1).await.unwrap());

        assert_eq!(h.handlers.leave_all_auto(1).await.unwrap(), 1);
        assert!(!h.handlers.queue().is_queued(TournamentSize::Eight, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_room_flow() {
        let h = create_test_handlers();
        let mut host_rx = h.connect(10).await;
        let mut guest_rx = h.connect(11).await;

        let room_id = h
            .handlers
            .custom_create(10, TournamentSize::Two)
            .await
            .unwrap();
        assert!(matches!(
            drain(&mut host_rx).first(),
            Some(ServerMessage::CustomCreate(created)) if created.room_id == room_id
        ));

        // Only the host may invite or start
        assert!(h.handlers.custom_invite(11, room_id, 12).await.is_err());
        let error = h.handlers.custom_start(10, room_id).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::RoomNotFull { current: 1, required: 2, .. })
        ));

        h.handlers.custom_invite(10, room_id, 11).await.unwrap();
        assert!(matches!(
            drain(&mut guest_rx).first(),
            Some(ServerMessage::CustomInvite(invite)) if invite.host_id == 10
        ));

        h.handlers.custom_accept(11, room_id).await.unwrap();
        let update = last_update(&drain(&mut host_rx)).clone();
        assert_eq!(update.host_id, Some(10));
        assert_eq!(update.users.len(), 2);
        assert_eq!(last_update(&drain(&mut guest_rx)), &update);

        let error = h.handlers.custom_start(11, room_id).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::NotHost { .. })
        ));

        h.handlers.custom_start(10, room_id).await.unwrap();
        let requests = h.publisher.tournament_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, TournamentMode::Custom);
        let mut players = requests[0].players.clone();
        players.sort();
        assert_eq!(players, vec![10, 11]);
        assert!(h.handlers.rooms().info(room_id).await.is_err());
        assert_eq!(h.handlers.rooms().room_of(10).await.unwrap(), None);

        // A repeated start finds no room and publishes nothing
        let error = h.handlers.custom_start(10, room_id).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::RoomNotFound { .. })
        ));
        assert_eq!(h.publisher.tournament_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_host_leaving_promotes_next_member() {
        let h = create_test_handlers();
        let _rx_host = h.connect(1).await;
        let mut rx_a = h.connect(2).await;
        let _rx_b = h.connect(3).await;

        let room_id = h
            .handlers
            .custom_create(1, TournamentSize::Four)
            .await
            .unwrap();
        for guest in [2, 3] {
            h.handlers.custom_invite(1, room_id, guest).await.unwrap();
            h.handlers.custom_accept(guest, room_id).await.unwrap();
        }
        drain(&mut rx_a);

        let outcome = h.handlers.custom_leave(1).await.unwrap().unwrap();
        assert_eq!(outcome.new_host, Some(2));
        assert_eq!(outcome.remaining, vec![2, 3]);

        let update = last_update(&drain(&mut rx_a)).clone();
        assert_eq!(update.host_id, Some(2));
        assert_eq!(update.users.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_queues_and_rooms() {
        let h = create_test_handlers();
        let _rx = h.connect(1).await;

        h.handlers.auto_join(1, TournamentSize::Four).await.unwrap();
        h.handlers.custom_create(1, TournamentSize::Two).await.unwrap();

        h.handlers.disconnected(1).await.unwrap();
        assert!(!h.handlers.queue().is_queued(TournamentSize::Four, 1).await.unwrap());
        assert_eq!(h.handlers.rooms().room_of(1).await.unwrap(), None);
    }
}
