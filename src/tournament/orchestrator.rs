//! Tournament orchestrator
//!
//! Drives a tournament from a completed cohort to its champion. Inbound events
//! (requested, created, match created, match result) arrive through
//! [`EventHandler`]; the ready command arrives from tournament sessions.

use crate::amqp::handlers::EventHandler;
use crate::amqp::messages::{
    DomainEvent, MatchCreated, MatchRequested, MatchResult, TournamentCreated,
    TournamentRequested,
};
use crate::amqp::publisher::EventPublisher;
use crate::bracket::build_bracket;
use crate::error::{as_tournament_error, Result, TournamentError};
use crate::metrics::MetricsCollector;
use crate::persistence::{MatchRecord, NewTournament, TournamentRepository};
use crate::profile::ProfileDirectory;
use crate::session::messages::{
    BracketMatchView, BracketSnapshot, FinishedNotice, GameResultNotice, MatchCreatedNotice,
    ReadyNotice, RosterEntry, ServerMessage, TournamentCreatedNotice, TournamentRoster,
};
use crate::session::notifier::{tournament_room, SessionNotifier};
use crate::store::{
    MatchServerRegistry, Namespace, PlayerStateStore, RequestClaim, RequestLedger, RoundAdvance,
    RoundStateStore, SharedStore, TournamentMeta,
};
use crate::types::{MatchId, MatchScore, MatchStatus, PlayerId, PlayerState, TournamentId};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statistics about orchestrator operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub tournaments_created: u64,
    pub tournaments_finished: u64,
    pub matches_requested: u64,
    pub results_recorded: u64,
    /// Results for matches that were already resolved
    pub duplicate_results: u64,
}

/// Shared-store views the orchestrator works on
#[derive(Debug, Clone)]
pub struct TournamentStores {
    pub rounds: RoundStateStore,
    pub players: PlayerStateStore,
    pub match_servers: MatchServerRegistry,
    pub requests: RequestLedger,
}

impl TournamentStores {
    pub fn new(store: SharedStore, tournament_ttl: Duration) -> Self {
        Self {
            rounds: RoundStateStore::new(store.clone(), tournament_ttl),
            players: PlayerStateStore::new(store.clone(), tournament_ttl),
            match_servers: MatchServerRegistry::new(store.clone()),
            requests: RequestLedger::new(store, tournament_ttl),
        }
    }
}

/// The loser according to the bracket, which must match the reported one
fn bracket_loser(record: &MatchRecord, event: &MatchResult) -> Result<PlayerId> {
    if record.players().is_none() {
        return Err(TournamentError::MatchMissingPlayers {
            match_id: record.id,
        }
        .into());
    }
    let loser_id = record.loser_of(event.winner_id).ok_or_else(|| {
        TournamentError::invalid(format!(
            "winner {} did not play match {}",
            event.winner_id, record.id
        ))
    })?;
    if loser_id != event.loser_id {
        return Err(TournamentError::invalid(format!(
            "match {} reported loser {} but the bracket says {}",
            record.id, event.loser_id, loser_id
        ))
        .into());
    }
    Ok(loser_id)
}

#[derive(Clone)]
pub struct TournamentOrchestrator {
    repository: Arc<dyn TournamentRepository>,
    stores: TournamentStores,
    profiles: ProfileDirectory,
    event_publisher: Arc<dyn EventPublisher>,
    notifier: SessionNotifier,
    stats: Arc<RwLock<OrchestratorStats>>,
    metrics_collector: Arc<MetricsCollector>,
}

impl TournamentOrchestrator {
    pub fn new(
        repository: Arc<dyn TournamentRepository>,
        stores: TournamentStores,
        profiles: ProfileDirectory,
        event_publisher: Arc<dyn EventPublisher>,
        notifier: SessionNotifier,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(
            repository,
            stores,
            profiles,
            event_publisher,
            notifier,
            metrics_collector,
        )
    }

    pub fn with_metrics(
        repository: Arc<dyn TournamentRepository>,
        stores: TournamentStores,
        profiles: ProfileDirectory,
        event_publisher: Arc<dyn EventPublisher>,
        notifier: SessionNotifier,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            repository,
            stores,
            profiles,
            event_publisher,
            notifier,
            stats: Arc::new(RwLock::new(OrchestratorStats::default())),
            metrics_collector,
        }
    }

    pub fn stores(&self) -> &TournamentStores {
        &self.stores
    }

    pub async fn get_stats(&self) -> Result<OrchestratorStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| TournamentError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;

        Ok(stats.clone())
    }

    fn update_stats(&self, update: impl FnOnce(&mut OrchestratorStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire stats lock for update"),
        }
    }

    /// Build, persist and initialize a tournament for a completed cohort.
    ///
    /// A redelivered request never creates a second tournament: if the first
    /// delivery persisted one, its initialization is finished instead.
    pub async fn handle_tournament_requested(
        &self,
        event: TournamentRequested,
    ) -> Result<TournamentId> {
        let start_time = Instant::now();
        let plan = build_bracket(event.size, &event.players)?;

        let (tournament_id, matches) = match self.stores.requests.claim(&event.request_id).await? {
            RequestClaim::Completed(tournament_id) => {
                info!(
                    "Request {} already produced tournament {}",
                    event.request_id, tournament_id
                );
                return Ok(tournament_id);
            }
            RequestClaim::InFlight => {
                return Err(TournamentError::RequestInFlight {
                    request_id: event.request_id,
                }
                .into())
            }
            RequestClaim::Resume(tournament_id) => {
                warn!(
                    "Resuming initialization of tournament {} for request {}",
                    tournament_id, event.request_id
                );
                let matches = self.repository.find_matches(tournament_id).await?;
                (tournament_id, matches)
            }
            RequestClaim::New => {
                info!(
                    "Creating {} tournament of size {} for players {:?}",
                    event.mode, event.size, event.players
                );
                let created = match self
                    .repository
                    .create_tournament_with_bracket(
                        NewTournament {
                            mode: event.mode,
                            size: event.size,
                            players: event.players.clone(),
                        },
                        &plan,
                    )
                    .await
                {
                    Ok(created) => created,
                    Err(e) => {
                        self.stores.requests.release(&event.request_id).await?;
                        return Err(e);
                    }
                };
                self.stores
                    .requests
                    .bind(&event.request_id, created.tournament.id)
                    .await?;
                (created.tournament.id, created.matches)
            }
        };

        if let Err(e) = self
            .stores
            .rounds
            .create(
                tournament_id,
                TournamentMeta {
                    mode: event.mode,
                    size: event.size,
                },
            )
            .await
        {
            match as_tournament_error(&e) {
                Some(TournamentError::TournamentAlreadyExists { .. }) => {
                    debug!("Tournament {} round state already present", tournament_id)
                }
                _ => return Err(e),
            }
        }
        for round in plan.rounds() {
            let match_ids: Vec<MatchId> = matches
                .iter()
                .filter(|m| m.round == round)
                .map(|m| m.id)
                .collect();
            self.stores
                .rounds
                .add_matches(tournament_id, round, &match_ids)
                .await?;
        }
        self.stores
            .players
            .register_players(tournament_id, &event.players)
            .await?;

        let resolved = self.profiles.prefetch(&event.players).await;
        if resolved < event.players.len() {
            warn!(
                "Tournament {}: only {} of {} profiles resolved",
                tournament_id,
                resolved,
                event.players.len()
            );
        }

        self.event_publisher
            .publish_tournament_created(TournamentCreated {
                tournament_id,
                players: event.players.clone(),
                mode: event.mode,
                size: event.size,
                timestamp: current_timestamp(),
            })
            .await?;
        self.stores.requests.complete(&event.request_id).await?;

        let setup_time = start_time.elapsed();
        self.metrics_collector
            .record_tournament_created(event.mode, event.size, setup_time);
        self.update_stats(|stats| stats.tournaments_created += 1);

        info!(
            "Tournament {} created with {} matches in {:.2}ms",
            tournament_id,
            matches.len(),
            setup_time.as_secs_f64() * 1000.0
        );
        Ok(tournament_id)
    }

    /// Point every player's waiting session at the new tournament
    pub async fn handle_tournament_created(&self, event: TournamentCreated) -> Result<()> {
        let directive = ServerMessage::TournamentCreated(TournamentCreatedNotice {
            tournament_id: event.tournament_id,
            mode: event.mode,
            size: event.size,
            room: tournament_room(event.tournament_id),
        });
        let roster = ServerMessage::MatchInfo(self.roster(event.tournament_id).await?);

        let mut notified = 0;
        for player_id in &event.players {
            if self
                .notifier
                .send_to_player(Namespace::Waiting, *player_id, &directive)
                .await?
            {
                self.notifier
                    .send_to_player(Namespace::Waiting, *player_id, &roster)
                    .await?;
                notified += 1;
            }
        }

        info!(
            "Tournament {}: notified {} of {} players",
            event.tournament_id,
            notified,
            event.players.len()
        );
        Ok(())
    }

    /// Tell both players where their match is hosted
    pub async fn handle_match_created(&self, event: MatchCreated) -> Result<()> {
        let message = ServerMessage::MatchCreated(MatchCreatedNotice {
            tournament_id: event.tournament_id,
            match_id: event.match_id,
            match_server_name: event.match_server_name.clone(),
            player1_id: event.player1_id,
            player2_id: event.player2_id,
        });

        for player_id in [event.player1_id, event.player2_id] {
            self.notifier
                .send_to_player(Namespace::Tournament, player_id, &message)
                .await?;
        }

        debug!(
            "Match {} of tournament {} hosted on {}",
            event.match_id, event.tournament_id, event.match_server_name
        );
        Ok(())
    }

    /// Record a result, eliminate the loser and advance the bracket.
    ///
    /// Every check runs before the result is stored. A result for a match that
    /// is already FINISHED completes whatever an earlier delivery left undone and
    /// is otherwise counted as a duplicate.
    pub async fn handle_match_result(&self, event: MatchResult) -> Result<()> {
        let tournament_id = event.tournament_id;
        let existing = self.repository.find_match(event.match_id).await?;
        if existing.tournament_id != tournament_id {
            return Err(TournamentError::invalid(format!(
                "match {} belongs to tournament {}, not {}",
                event.match_id, existing.tournament_id, tournament_id
            ))
            .into());
        }
        let loser_id = bracket_loser(&existing, &event)?;

        match existing.status {
            MatchStatus::Finished => return self.resume_result(&existing, &event, loser_id).await,
            MatchStatus::NotStarted => {
                return Err(TournamentError::MatchNotInProgress {
                    match_id: existing.id,
                }
                .into())
            }
            MatchStatus::InProgress => {}
        }

        let loser_state = self
            .stores
            .players
            .player_state(tournament_id, loser_id)
            .await?;
        if loser_state != Some(PlayerState::Playing) {
            // A concurrent delivery may have resolved the match meanwhile
            let current = self.repository.find_match(existing.id).await?;
            if current.status == MatchStatus::Finished {
                return self.resume_result(&current, &event, loser_id).await;
            }
            return Err(TournamentError::NotPlaying {
                tournament_id,
                player_id: loser_id,
            }
            .into());
        }

        let score = MatchScore {
            player1: event.player1_score,
            player2: event.player2_score,
        };
        let record = match self
            .repository
            .record_match_result(event.match_id, score, event.winner_id)
            .await
        {
            Ok(recorded) => recorded.record,
            Err(e) => {
                if let Some(TournamentError::MatchAlreadyResolved { .. }) = as_tournament_error(&e)
                {
                    let current = self.repository.find_match(existing.id).await?;
                    return self.resume_result(&current, &event, loser_id).await;
                }
                return Err(e);
            }
        };

        if let Some(server) = &record.match_server {
            self.stores
                .match_servers
                .adjust_game_count(server, -1)
                .await?;
        }

        self.settle_result(&record, &event, loser_id).await
    }

    /// Handle a result for a match the repository already marks FINISHED
    async fn resume_result(
        &self,
        record: &MatchRecord,
        event: &MatchResult,
        loser_id: PlayerId,
    ) -> Result<()> {
        if record.winner_id != Some(event.winner_id) {
            warn!(
                "Match {} was won by {:?}; ignoring result naming {}",
                record.id, record.winner_id, event.winner_id
            );
            self.count_duplicate();
            return Ok(());
        }

        let active = self
            .stores
            .rounds
            .matches_in_round(record.tournament_id, record.round)
            .await?;
        if active.contains(&record.id) {
            warn!(
                "Match {} is resolved but still active in round {}; settling it",
                record.id, record.round
            );
            return self.settle_result(record, event, loser_id).await;
        }
        self.settle_duplicate(record, event.winner_id, loser_id)
            .await
    }

    /// Eliminate the loser, retire the match from its round and advance.
    ///
    /// Retiring the match is the claim: only the caller that removes it from the
    /// round broadcasts the result.
    async fn settle_result(
        &self,
        record: &MatchRecord,
        event: &MatchResult,
        loser_id: PlayerId,
    ) -> Result<()> {
        let tournament_id = record.tournament_id;
        let round = record.round;

        self.stores
            .players
            .move_to_eliminated(tournament_id, loser_id)
            .await?;
        if !self
            .stores
            .rounds
            .remove_match(tournament_id, round, record.id)
            .await?
        {
            return self
                .settle_duplicate(record, event.winner_id, loser_id)
                .await;
        }

        self.metrics_collector.record_match_result("recorded");
        self.update_stats(|stats| stats.results_recorded += 1);

        self.notifier
            .broadcast(
                &tournament_room(tournament_id),
                &ServerMessage::GameResult(GameResultNotice {
                    tournament_id,
                    match_id: record.id,
                    round,
                    player1_score: event.player1_score,
                    player2_score: event.player2_score,
                    winner_id: event.winner_id,
                    loser_id,
                }),
            )
            .await?;

        let advance = self.stores.rounds.advance_from(tournament_id, round).await?;
        self.complete_advance(tournament_id, round, advance, event.winner_id)
            .await
    }

    /// A result that was already settled. The elimination and round advance are
    /// retried in case the first delivery stopped before them.
    async fn settle_duplicate(
        &self,
        record: &MatchRecord,
        winner_id: PlayerId,
        loser_id: PlayerId,
    ) -> Result<()> {
        warn!("Duplicate result for match {}", record.id);
        self.count_duplicate();

        let tournament_id = record.tournament_id;
        if self
            .stores
            .players
            .player_state(tournament_id, loser_id)
            .await?
            == Some(PlayerState::Playing)
        {
            self.stores
                .players
                .move_to_eliminated(tournament_id, loser_id)
                .await?;
        }

        let advance = self
            .stores
            .rounds
            .advance_from(tournament_id, record.round)
            .await?;
        match advance {
            RoundAdvance::Advanced(_) | RoundAdvance::Finished => {
                self.complete_advance(tournament_id, record.round, advance, winner_id)
                    .await
            }
            _ => Ok(()),
        }
    }

    fn count_duplicate(&self) {
        self.metrics_collector.record_match_result("duplicate");
        self.update_stats(|stats| stats.duplicate_results += 1);
    }

    async fn complete_advance(
        &self,
        tournament_id: TournamentId,
        round: u32,
        advance: RoundAdvance,
        winner_id: PlayerId,
    ) -> Result<()> {
        match advance {
            RoundAdvance::Advanced(next) => {
                let survivors = self.stores.players.reset_round(tournament_id).await?;
                self.metrics_collector.record_round_advanced();
                info!(
                    "Tournament {} moved to round {} with {} players",
                    tournament_id,
                    next,
                    survivors.len()
                );
            }
            RoundAdvance::Finished => {}
            RoundAdvance::RoundPending { remaining } => debug!(
                "Tournament {} round {}: {} matches outstanding",
                tournament_id, round, remaining
            ),
            other => debug!("Tournament {} round unchanged: {:?}", tournament_id, other),
        }

        self.broadcast_bracket(tournament_id).await?;

        if advance == RoundAdvance::Finished {
            self.finish(tournament_id, winner_id).await?;
        }
        Ok(())
    }

    async fn finish(&self, tournament_id: TournamentId, winner_id: PlayerId) -> Result<()> {
        let tournament = self
            .repository
            .finish_tournament(tournament_id, Some(winner_id))
            .await?;

        self.metrics_collector
            .record_tournament_finished(tournament.mode);
        self.update_stats(|stats| stats.tournaments_finished += 1);

        self.notifier
            .broadcast(
                &tournament_room(tournament_id),
                &ServerMessage::Finished(FinishedNotice {
                    tournament_id,
                    winner_id: Some(winner_id),
                }),
            )
            .await?;

        info!(
            "Tournament {} finished, champion is player {}",
            tournament_id, winner_id
        );
        Ok(())
    }

    async fn broadcast_bracket(&self, tournament_id: TournamentId) -> Result<()> {
        let snapshot = self.bracket_snapshot(tournament_id).await?;
        self.notifier
            .broadcast(
                &tournament_room(tournament_id),
                &ServerMessage::BracketUpdated(snapshot),
            )
            .await?;
        Ok(())
    }

    pub async fn bracket_snapshot(&self, tournament_id: TournamentId) -> Result<BracketSnapshot> {
        let current_round = self.stores.rounds.current_round(tournament_id).await?;
        let matches = self
            .repository
            .find_matches(tournament_id)
            .await?
            .into_iter()
            .map(|record| BracketMatchView {
                match_id: record.id,
                round: record.round,
                player1_id: record.player1_id,
                player2_id: record.player2_id,
                winner_id: record.winner_id,
                status: record.status,
            })
            .collect();

        Ok(BracketSnapshot {
            tournament_id,
            current_round,
            matches,
        })
    }

    /// Mark a player ready; the last one to get ready starts the round
    pub async fn handle_ready(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<()> {
        if self.stores.rounds.is_finished(tournament_id).await? {
            return Err(TournamentError::TournamentFinished { tournament_id }.into());
        }

        if !self
            .stores
            .players
            .set_ready(tournament_id, player_id)
            .await?
        {
            debug!(
                "Player {} already ready in tournament {}",
                player_id, tournament_id
            );
            return Ok(());
        }

        let room = tournament_room(tournament_id);
        self.notifier
            .broadcast(
                &room,
                &ServerMessage::Ready(ReadyNotice::UserReady { user_id: player_id }),
            )
            .await?;

        if !self
            .stores
            .players
            .are_all_players_ready(tournament_id)
            .await?
        {
            return Ok(());
        }

        // Only the caller that performs the bulk move starts the round.
        let playing = match self
            .stores
            .players
            .move_players_to_playing(tournament_id)
            .await
        {
            Ok(playing) => playing,
            Err(e) => {
                if let Some(TournamentError::PlayersNotReady { .. }) = as_tournament_error(&e) {
                    debug!("Tournament {} round already started", tournament_id);
                    return Ok(());
                }
                return Err(e);
            }
        };

        self.notifier
            .broadcast(&room, &ServerMessage::Ready(ReadyNotice::AllUsersReady))
            .await?;

        info!(
            "Tournament {}: all {} players ready, starting round",
            tournament_id,
            playing.len()
        );
        self.start_round(tournament_id).await
    }

    async fn start_round(&self, tournament_id: TournamentId) -> Result<()> {
        let round = self.stores.rounds.current_round(tournament_id).await?;
        let match_ids = self
            .stores
            .rounds
            .matches_in_round(tournament_id, round)
            .await?;

        for match_id in match_ids {
            let record = self.repository.find_match(match_id).await?;
            if record.status == MatchStatus::Finished {
                warn!("Match {} already has a result; not requesting it", record.id);
                continue;
            }
            self.request_match(tournament_id, &record).await?;
        }
        Ok(())
    }

    async fn request_match(&self, tournament_id: TournamentId, record: &MatchRecord) -> Result<()> {
        let (player1_id, player2_id) = record
            .players()
            .ok_or(TournamentError::MatchMissingPlayers {
                match_id: record.id,
            })?;

        let server = self.stores.match_servers.best_match_server().await?;
        self.repository.mark_match_started(record.id, &server).await?;
        self.stores
            .match_servers
            .adjust_game_count(&server, 1)
            .await?;

        if let Err(e) = self
            .event_publisher
            .publish_match_requested(MatchRequested {
                tournament_id,
                match_id: record.id,
                match_server_name: server.clone(),
                player1_id,
                player2_id,
                timestamp: current_timestamp(),
            })
            .await
        {
            self.metrics_collector
                .record_event_published("MatchRequested", false);
            error!("Failed to request match {}: {}", record.id, e);
            return Err(e);
        }

        self.metrics_collector
            .record_event_published("MatchRequested", true);
        self.metrics_collector.record_match_requested();
        self.update_stats(|stats| stats.matches_requested += 1);

        info!(
            "Match {} (round {}) requested on {}: {} vs {}",
            record.id, record.round, server, player1_id, player2_id
        );
        Ok(())
    }

    /// Roster with the current state of every registered player
    pub async fn roster(&self, tournament_id: TournamentId) -> Result<TournamentRoster> {
        let info = self.stores.rounds.info(tournament_id).await?;
        let player_ids = self.stores.players.all_player_ids(tournament_id).await?;
        let profiles = self.profiles.resolve_many(&player_ids).await;

        let mut players = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let state = self
                .stores
                .players
                .player_state(tournament_id, profile.id)
                .await?
                .unwrap_or(PlayerState::Nothing);
            players.push(RosterEntry {
                user_id: profile.id,
                nickname: profile.nickname,
                profile_image: profile.avatar_url,
                state,
            });
        }

        Ok(TournamentRoster {
            tournament_id,
            mode: info.mode,
            size: info.size,
            players,
        })
    }

    /// Send the roster to a freshly connected tournament session
    pub async fn send_tournament_info(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<()> {
        let roster = self.roster(tournament_id).await?;
        self.notifier
            .send_to_player(
                Namespace::Tournament,
                player_id,
                &ServerMessage::MatchInfo(roster),
            )
            .await?;
        Ok(())
    }

    pub async fn is_participant(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<bool> {
        self.stores
            .players
            .is_participant(tournament_id, player_id)
            .await
    }
}

#[async_trait]
impl EventHandler for TournamentOrchestrator {
    async fn handle_event(&self, event: DomainEvent) -> Result<()> {
        event.validate()?;

        match event {
            DomainEvent::TournamentRequested(event) => {
                self.handle_tournament_requested(event).await.map(|_| ())
            }
            DomainEvent::TournamentCreated(event) => self.handle_tournament_created(event).await,
            DomainEvent::MatchCreated(event) => self.handle_match_created(event).await,
            DomainEvent::MatchResult(event) => self.handle_match_result(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::persistence::InMemoryTournamentRepository;
    use crate::profile::client::MockProfileService;
    use crate::session::hub::InMemorySessionHub;
    use crate::store::{
        ProfileCache, SessionStore, DEFAULT_PROFILE_TTL, DEFAULT_SESSION_TTL,
        DEFAULT_TOURNAMENT_TTL,
    };
    use crate::types::{PlayerProfile, TournamentMode, TournamentSize, TournamentStatus};

    struct Harness {
        orchestrator: TournamentOrchestrator,
        repository: Arc<InMemoryTournamentRepository>,
        publisher: Arc<MockEventPublisher>,
    }

    async fn create_test_orchestrator() -> Harness {
        let store = SharedStore::new();
        let repository = Arc::new(InMemoryTournamentRepository::new());
        let publisher = Arc::new(MockEventPublisher::new());

        let mut service = MockProfileService::new();
        service.expect_fetch_profile().returning(|id| {
            Ok(PlayerProfile {
                id,
                nickname: format!("player{}", id),
                avatar_url: format!("https://cdn/{}.png", id),
            })
        });
        let profiles = ProfileDirectory::new(
            Arc::new(service),
            ProfileCache::new(store.clone(), DEFAULT_PROFILE_TTL),
        );
        let notifier = SessionNotifier::new(
            SessionStore::new(store.clone(), DEFAULT_SESSION_TTL),
            Arc::new(InMemorySessionHub::new()),
        );

        let stores = TournamentStores::new(store, DEFAULT_TOURNAMENT_TTL);
        stores.match_servers.register("arena-1").await.unwrap();

        let orchestrator = TournamentOrchestrator::new(
            repository.clone(),
            stores,
            profiles,
            publisher.clone(),
            notifier,
        );
        Harness {
            orchestrator,
            repository,
            publisher,
        }
    }

    fn request(size: TournamentSize, players: Vec<PlayerId>) -> TournamentRequested {
        TournamentRequested {
            request_id: crate::utils::generate_request_id(),
            players,
            mode: TournamentMode::Auto,
            size,
            timestamp: current_timestamp(),
        }
    }

    fn result_for(
        tournament_id: TournamentId,
        request: &MatchRequested,
        winner: PlayerId,
    ) -> MatchResult {
        let loser = if winner == request.player1_id {
            request.player2_id
        } else {
            request.player1_id
        };
        MatchResult {
            tournament_id,
            match_id: request.match_id,
            player1_score: 3,
            player2_score: 1,
            winner_id: winner,
            loser_id: loser,
            timestamp: current_timestamp(),
        }
    }

    #[tokio::test]
    async fn test_tournament_requested_initializes_state() {
        let h = create_test_orchestrator().await;

        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Four, vec![1, 2, 3, 4]))
            .await
            .unwrap();

        let info = h.orchestrator.stores().rounds.info(id).await.unwrap();
        assert_eq!(info.current_round, 4);
        assert_eq!(info.status, TournamentStatus::InProgress);
        assert_eq!(
            h.orchestrator
                .stores()
                .rounds
                .matches_in_round(id, 4)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            h.orchestrator
                .stores()
                .rounds
                .matches_in_round(id, 2)
                .await
                .unwrap()
                .len(),
            1
        );

        let created = h.publisher.tournaments_created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].tournament_id, id);
        assert_eq!(created[0].players, vec![1, 2, 3, 4]);
        assert_eq!(h.orchestrator.get_stats().await.unwrap().tournaments_created, 1);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_without_mutation() {
        let h = create_test_orchestrator().await;

        let result = h
            .orchestrator
            .handle_event(DomainEvent::TournamentRequested(request(
                TournamentSize::Four,
                vec![1, 2, 3],
            )))
            .await;

        assert!(result.is_err());
        assert_eq!(h.repository.tournament_count().unwrap(), 0);
        assert!(h.publisher.get_published_events().is_empty());
    }

    #[tokio::test]
    async fn test_ready_starts_round_once_everyone_is_ready() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Four, vec![1, 2, 3, 4]))
            .await
            .unwrap();

        for player in [1, 2, 3] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        assert!(h.publisher.match_requests().is_empty());

        // Repeated ready is a no-op
        h.orchestrator.handle_ready(id, 1).await.unwrap();
        h.orchestrator.handle_ready(id, 4).await.unwrap();

        let requests = h.publisher.match_requests();
        assert_eq!(requests.len(), 2);
        let mut pairs: Vec<_> = requests
            .iter()
            .map(|r| (r.player1_id, r.player2_id))
            .collect();
        pairs.sort();
        assert_eq!(pairs, vec![(1, 2), (3, 4)]);
        assert!(requests.iter().all(|r| r.match_server_name == "arena-1"));

        for request in &requests {
            let record = h.repository.find_match(request.match_id).await.unwrap();
            assert_eq!(record.status, MatchStatus::InProgress);
        }
        assert_eq!(
            h.orchestrator
                .stores()
                .players
                .player_state(id, 1)
                .await
                .unwrap(),
            Some(PlayerState::Playing)
        );
    }

    #[tokio::test]
    async fn test_full_tournament_runs_to_champion() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Four, vec![1, 2, 3, 4]))
            .await
            .unwrap();

        for player in [1, 2, 3, 4] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let first_round = h.publisher.match_requests();
        for request in &first_round {
            let winner = request.player1_id.min(request.player2_id);
            h.orchestrator
                .handle_match_result(result_for(id, request, winner))
                .await
                .unwrap();
        }

        assert_eq!(h.orchestrator.stores().rounds.current_round(id).await.unwrap(), 2);
        assert_eq!(
            h.orchestrator
                .stores()
                .players
                .active_player_ids(id)
                .await
                .unwrap(),
            vec![1, 3]
        );

        h.publisher.clear_events();
        h.orchestrator.handle_ready(id, 1).await.unwrap();
        h.orchestrator.handle_ready(id, 3).await.unwrap();
        let final_round = h.publisher.match_requests();
        assert_eq!(final_round.len(), 1);
        assert_eq!(
            (final_round[0].player1_id, final_round[0].player2_id),
            (1, 3)
        );

        h.orchestrator
            .handle_match_result(result_for(id, &final_round[0], 3))
            .await
            .unwrap();

        assert!(h.orchestrator.stores().rounds.is_finished(id).await.unwrap());
        let tournament = h.repository.find_tournament(id).await.unwrap();
        assert_eq!(tournament.status, TournamentStatus::Finished);
        assert_eq!(tournament.winner_id, Some(3));
        assert!(h.orchestrator.handle_ready(id, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_result_is_acknowledged() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Two, vec![5, 6]))
            .await
            .unwrap();
        for player in [5, 6] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let requested = h.publisher.match_requests();
        let result = result_for(id, &requested[0], 5);

        h.orchestrator.handle_match_result(result.clone()).await.unwrap();
        h.orchestrator.handle_match_result(result).await.unwrap();

        let stats = h.orchestrator.get_stats().await.unwrap();
        assert_eq!(stats.results_recorded, 1);
        assert_eq!(stats.duplicate_results, 1);
        assert_eq!(stats.tournaments_finished, 1);
    }

    #[tokio::test]
    async fn test_result_for_foreign_tournament_is_rejected() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Two, vec![5, 6]))
            .await
            .unwrap();
        for player in [5, 6] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let requested = h.publisher.match_requests();
        let mut result = result_for(id, &requested[0], 5);
        result.tournament_id = id + 100;

        let error = h.orchestrator.handle_match_result(result).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_roster_reports_player_states() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Two, vec![8, 9]))
            .await
            .unwrap();
        h.orchestrator.handle_ready(id, 9).await.unwrap();

        let roster = h.orchestrator.roster(id).await.unwrap();
        assert_eq!(roster.players.len(), 2);
        assert_eq!(roster.players[0].user_id, 8);
        assert_eq!(roster.players[0].state, PlayerState::Nothing);
        assert_eq!(roster.players[1].state, PlayerState::Ready);
        assert_eq!(roster.players[1].nickname, "player9");
        assert!(h.orchestrator.is_participant(id, 8).await.unwrap());
        assert!(!h.orchestrator.is_participant(id, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_redelivered_request_creates_one_tournament() {
        let h = create_test_orchestrator().await;
        let event = request(TournamentSize::Four, vec![1, 2, 3, 4]);

        let first = h
            .orchestrator
            .handle_tournament_requested(event.clone())
            .await
            .unwrap();
        let second = h
            .orchestrator
            .handle_tournament_requested(event)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.repository.tournament_count().unwrap(), 1);
        assert_eq!(h.publisher.tournaments_created().len(), 1);
        assert_eq!(h.orchestrator.get_stats().await.unwrap().tournaments_created, 1);
    }

    #[tokio::test]
    async fn test_request_retry_finishes_the_first_tournament() {
        let h = create_test_orchestrator().await;
        let event = request(TournamentSize::Two, vec![5, 6]);

        h.publisher.set_failing(true);
        assert!(h
            .orchestrator
            .handle_tournament_requested(event.clone())
            .await
            .is_err());
        assert_eq!(h.repository.tournament_count().unwrap(), 1);

        h.publisher.set_failing(false);
        let id = h
            .orchestrator
            .handle_tournament_requested(event)
            .await
            .unwrap();

        assert_eq!(h.repository.tournament_count().unwrap(), 1);
        let created = h.publisher.tournaments_created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].tournament_id, id);
        assert_eq!(
            h.orchestrator
                .stores()
                .rounds
                .matches_in_round(id, 2)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            h.orchestrator
                .stores()
                .players
                .all_player_ids(id)
                .await
                .unwrap(),
            vec![5, 6]
        );
    }

    #[tokio::test]
    async fn test_result_before_round_start_leaves_tournament_playable() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Four, vec![1, 2, 3, 4]))
            .await
            .unwrap();
        let leaf = h.repository.find_matches(id).await.unwrap()[0].clone();
        let (player1, player2) = leaf.players().unwrap();
        let early = MatchResult {
            tournament_id: id,
            match_id: leaf.id,
            player1_score: 3,
            player2_score: 0,
            winner_id: player1,
            loser_id: player2,
            timestamp: current_timestamp(),
        };

        for _ in 0..2 {
            let error = h
                .orchestrator
                .handle_match_result(early.clone())
                .await
                .unwrap_err();
            assert!(matches!(
                as_tournament_error(&error),
                Some(TournamentError::MatchNotInProgress { .. })
            ));
        }

        let untouched = h.repository.find_match(leaf.id).await.unwrap();
        assert_eq!(untouched.status, MatchStatus::NotStarted);
        assert!(h
            .orchestrator
            .stores()
            .rounds
            .matches_in_round(id, 4)
            .await
            .unwrap()
            .contains(&leaf.id));
        assert_eq!(h.orchestrator.get_stats().await.unwrap().duplicate_results, 0);

        for player in [1, 2, 3, 4] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let requests = h.publisher.match_requests();
        assert_eq!(requests.len(), 2);

        for request in &requests {
            h.orchestrator
                .handle_match_result(result_for(id, request, request.player1_id))
                .await
                .unwrap();
        }
        assert_eq!(h.orchestrator.stores().rounds.current_round(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_result_with_wrong_loser_is_rejected() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Four, vec![1, 2, 3, 4]))
            .await
            .unwrap();
        for player in [1, 2, 3, 4] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let requested = h.publisher.match_requests()[0].clone();
        let mut result = result_for(id, &requested, requested.player1_id);
        result.loser_id = 99;

        let error = h.orchestrator.handle_match_result(result).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&error),
            Some(TournamentError::InvalidPayload { .. })
        ));
        let record = h.repository.find_match(requested.match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::InProgress);
        assert_eq!(
            h.orchestrator
                .stores()
                .players
                .player_state(id, requested.player2_id)
                .await
                .unwrap(),
            Some(PlayerState::Playing)
        );
    }

    #[tokio::test]
    async fn test_redelivery_settles_a_half_applied_result() {
        let h = create_test_orchestrator().await;
        let id = h
            .orchestrator
            .handle_tournament_requested(request(TournamentSize::Two, vec![5, 6]))
            .await
            .unwrap();
        for player in [5, 6] {
            h.orchestrator.handle_ready(id, player).await.unwrap();
        }
        let requested = h.publisher.match_requests()[0].clone();

        // The result reached the repository but nothing after it ran
        h.repository
            .record_match_result(requested.match_id, MatchScore { player1: 3, player2: 1 }, 5)
            .await
            .unwrap();

        h.orchestrator
            .handle_match_result(result_for(id, &requested, 5))
            .await
            .unwrap();

        let stats = h.orchestrator.get_stats().await.unwrap();
        assert_eq!(stats.results_recorded, 1);
        assert_eq!(stats.tournaments_finished, 1);
        assert_eq!(
            h.orchestrator
                .stores()
                .players
                .player_state(id, 6)
                .await
                .unwrap(),
            Some(PlayerState::Eliminated)
        );
        assert!(h.orchestrator.stores().rounds.is_finished(id).await.unwrap());
        assert_eq!(
            h.repository.find_tournament(id).await.unwrap().winner_id,
            Some(5)
        );
    }
}
