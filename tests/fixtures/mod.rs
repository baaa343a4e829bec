//! Test fixtures for integration testing
//!
//! A fully wired service without a broker: client commands go through the
//! gateway dispatcher and inbound events are handed to the orchestrator directly.

#![allow(dead_code)]

use async_trait::async_trait;
use bracket_room::amqp::handlers::EventHandler;
use bracket_room::amqp::messages::{
    DomainEvent, MatchCreated, MatchRequested, MatchResult, TournamentCreated,
};
use bracket_room::amqp::publisher::MockEventPublisher;
use bracket_room::config::AppConfig;
use bracket_room::error::{Result, TournamentError};
use bracket_room::profile::ProfileService;
use bracket_room::service::AppState;
use bracket_room::session::gateway::{close_session, dispatch, open_session, Endpoint};
use bracket_room::session::messages::{ClientCommand, ServerMessage};
use bracket_room::session::GatewayState;
use bracket_room::types::{PlayerId, PlayerProfile, TournamentId};
use bracket_room::utils::current_timestamp;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Profile service that knows every player except the listed ones
#[derive(Debug, Default)]
pub struct StaticProfileService {
    unknown: HashSet<PlayerId>,
}

impl StaticProfileService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(unknown: &[PlayerId]) -> Self {
        Self {
            unknown: unknown.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl ProfileService for StaticProfileService {
    async fn fetch_profile(&self, player_id: PlayerId) -> Result<PlayerProfile> {
        if self.unknown.contains(&player_id) {
            return Err(TournamentError::ProfileServiceFailed {
                message: format!("no profile for {}", player_id),
            }
            .into());
        }
        Ok(PlayerProfile {
            id: player_id,
            nickname: format!("player{}", player_id),
            avatar_url: format!("https://cdn.test/{}.png", player_id),
        })
    }
}

/// One connected client
pub struct TestClient {
    pub player_id: PlayerId,
    pub endpoint: Endpoint,
    pub session_id: String,
    pub rx: UnboundedReceiver<ServerMessage>,
}

impl TestClient {
    /// Everything received so far
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn event_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(|m| m.event_name()).collect()
    }
}

pub struct TestSystem {
    pub app: AppState,
    pub gateway: GatewayState,
    pub publisher: Arc<MockEventPublisher>,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_profiles(StaticProfileService::new()).await
    }

    pub async fn with_profiles(profiles: StaticProfileService) -> Self {
        let mut config = AppConfig::default();
        config.store.match_servers = vec!["arena-1".to_string(), "arena-2".to_string()];

        let publisher = Arc::new(MockEventPublisher::new());
        let app = AppState::with_components(config, publisher.clone(), Arc::new(profiles))
            .await
            .expect("service assembles without a broker");
        let gateway = app.gateway_state();

        Self {
            app,
            gateway,
            publisher,
        }
    }

    pub async fn connect(&self, endpoint: Endpoint, player_id: PlayerId) -> TestClient {
        let session_id = format!("{:?}-{}-{}", endpoint, player_id, uuid::Uuid::new_v4());
        let rx = self.gateway.hub.register(&session_id).await;
        open_session(&self.gateway, endpoint, player_id, &session_id)
            .await
            .expect("session opens");

        TestClient {
            player_id,
            endpoint,
            session_id,
            rx,
        }
    }

    pub async fn disconnect(&self, client: TestClient) {
        close_session(
            &self.gateway,
            client.endpoint,
            client.player_id,
            &client.session_id,
        )
        .await
        .expect("session closes");
    }

    pub async fn send(&self, client: &TestClient, command: ClientCommand) -> Result<()> {
        dispatch(&self.gateway, client.endpoint, client.player_id, command).await
    }

    pub async fn deliver(&self, event: DomainEvent) -> Result<()> {
        self.app.orchestrator().handle_event(event).await
    }

    /// Feed every pending tournament request back in, as the consumer would
    pub async fn deliver_tournament_requests(&self) -> Vec<TournamentId> {
        let requests = self.publisher.tournament_requests();
        self.publisher.clear_events();

        for request in requests {
            self.deliver(DomainEvent::TournamentRequested(request))
                .await
                .expect("tournament request accepted");
        }

        let created = self.publisher.tournaments_created();
        for event in &created {
            self.deliver(DomainEvent::TournamentCreated(event.clone()))
                .await
                .expect("tournament created accepted");
        }
        created.into_iter().map(|event| event.tournament_id).collect()
    }

    pub async fn created_event(&self, tournament_id: TournamentId) -> Option<TournamentCreated> {
        self.publisher
            .tournaments_created()
            .into_iter()
            .find(|event| event.tournament_id == tournament_id)
    }

    /// Host the match and report the given winner
    pub async fn play(&self, request: &MatchRequested, winner_id: PlayerId) -> Result<()> {
        self.deliver(DomainEvent::MatchCreated(MatchCreated {
            tournament_id: request.tournament_id,
            match_id: request.match_id,
            match_server_name: request.match_server_name.clone(),
            player1_id: request.player1_id,
            player2_id: request.player2_id,
            timestamp: current_timestamp(),
        }))
        .await?;

        self.deliver(DomainEvent::MatchResult(result_for(request, winner_id)))
            .await
    }
}

pub fn result_for(request: &MatchRequested, winner_id: PlayerId) -> MatchResult {
    let loser_id = if winner_id == request.player1_id {
        request.player2_id
    } else {
        request.player1_id
    };
    let (player1_score, player2_score) = if winner_id == request.player1_id {
        (3, 1)
    } else {
        (1, 3)
    };

    MatchResult {
        tournament_id: request.tournament_id,
        match_id: request.match_id,
        player1_score,
        player2_score,
        winner_id,
        loser_id,
        timestamp: current_timestamp(),
    }
}
