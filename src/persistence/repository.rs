//! Durable tournament and match records
//!
//! The trait is the seam for a relational backend. [`InMemoryTournamentRepository`]
//! keeps everything behind one lock and takes it once per call, so each call is a
//! single transaction.

use crate::bracket::BracketPlan;
use crate::error::{Result, TournamentError};
use crate::types::{
    MatchId, MatchScore, MatchSlot, MatchStatus, PlayerId, TournamentId, TournamentMode,
    TournamentSize, TournamentStatus,
};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::info;

/// A persisted tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: TournamentId,
    pub size: TournamentSize,
    pub mode: TournamentMode,
    pub status: TournamentStatus,
    pub players: Vec<PlayerId>,
    pub winner_id: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A persisted bracket match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub tournament_id: TournamentId,
    pub round: u32,
    pub player1_id: Option<PlayerId>,
    pub player2_id: Option<PlayerId>,
    pub player1_score: Option<u32>,
    pub player2_score: Option<u32>,
    pub winner_id: Option<PlayerId>,
    pub status: MatchStatus,
    pub next_match_id: Option<MatchId>,
    pub next_slot: Option<MatchSlot>,
    pub previous_match_ids: Vec<MatchId>,
    pub match_server: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    /// Both slots are filled
    pub fn players(&self) -> Option<(PlayerId, PlayerId)> {
        self.player1_id.zip(self.player2_id)
    }

    pub fn loser_of(&self, winner_id: PlayerId) -> Option<PlayerId> {
        match self.players()? {
            (p1, p2) if p1 == winner_id => Some(p2),
            (p1, p2) if p2 == winner_id => Some(p1),
            _ => None,
        }
    }
}

/// Input for creating a tournament
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTournament {
    pub mode: TournamentMode,
    pub size: TournamentSize,
    pub players: Vec<PlayerId>,
}

/// A tournament together with its freshly persisted bracket
#[derive(Debug, Clone)]
pub struct CreatedTournament {
    pub tournament: TournamentRecord,
    /// Matches in bracket plan order; index 0 is the final
    pub matches: Vec<MatchRecord>,
}

impl CreatedTournament {
    pub fn match_ids_in_round(&self, round: u32) -> Vec<MatchId> {
        self.matches
            .iter()
            .filter(|m| m.round == round)
            .map(|m| m.id)
            .collect()
    }
}

/// Outcome of recording a match result
#[derive(Debug, Clone)]
pub struct RecordedResult {
    pub record: MatchRecord,
    /// Parent match and slot the winner was placed into
    pub advanced_to: Option<(MatchId, MatchSlot)>,
}

#[async_trait]
pub trait TournamentRepository: Send + Sync {
    /// Persist the tournament, its players and every bracket match in one transaction
    async fn create_tournament_with_bracket(
        &self,
        tournament: NewTournament,
        plan: &BracketPlan,
    ) -> Result<CreatedTournament>;

    async fn find_tournament(&self, tournament_id: TournamentId) -> Result<TournamentRecord>;

    async fn find_match(&self, match_id: MatchId) -> Result<MatchRecord>;

    /// Every match of a tournament, leaves first
    async fn find_matches(&self, tournament_id: TournamentId) -> Result<Vec<MatchRecord>>;

    /// Store scores and winner and place the winner into the parent match.
    /// Only an IN_PROGRESS match accepts a result.
    async fn record_match_result(
        &self,
        match_id: MatchId,
        score: MatchScore,
        winner_id: PlayerId,
    ) -> Result<RecordedResult>;

    async fn mark_match_started(&self, match_id: MatchId, match_server: &str)
        -> Result<MatchRecord>;

    async fn finish_tournament(
        &self,
        tournament_id: TournamentId,
        winner_id: Option<PlayerId>,
    ) -> Result<TournamentRecord>;
}

#[derive(Debug, Default)]
struct Tables {
    tournaments: BTreeMap<TournamentId, TournamentRecord>,
    matches: BTreeMap<MatchId, MatchRecord>,
    next_tournament_id: TournamentId,
    next_match_id: MatchId,
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct InMemoryTournamentRepository {
    tables: RwLock<Tables>,
}

impl InMemoryTournamentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| {
            TournamentError::InternalError {
                message: "Failed to acquire repository read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| {
            TournamentError::InternalError {
                message: "Failed to acquire repository write lock".to_string(),
            }
            .into()
        })
    }

    pub fn tournament_count(&self) -> Result<usize> {
        Ok(self.read()?.tournaments.len())
    }
}

#[async_trait]
impl TournamentRepository for InMemoryTournamentRepository {
    async fn create_tournament_with_bracket(
        &self,
        tournament: NewTournament,
        plan: &BracketPlan,
    ) -> Result<CreatedTournament> {
        if plan.size != tournament.size {
            return Err(TournamentError::invalid(format!(
                "bracket planned for size {} but tournament has size {}",
                plan.size, tournament.size
            ))
            .into());
        }

        let mut tables = self.write()?;
        let now = current_timestamp();

        tables.next_tournament_id += 1;
        let tournament_id = tables.next_tournament_id;

        let first_match_id = tables.next_match_id + 1;
        tables.next_match_id += plan.matches.len() as MatchId;
        let id_of = |index: usize| first_match_id + index as MatchId;

        let matches: Vec<MatchRecord> = plan
            .matches
            .iter()
            .map(|planned| MatchRecord {
                id: id_of(planned.index),
                tournament_id,
                round: planned.round,
                player1_id: planned.player1,
                player2_id: planned.player2,
                player1_score: None,
                player2_score: None,
                winner_id: None,
                status: MatchStatus::NotStarted,
                next_match_id: planned.feeds.map(|(parent, _)| id_of(parent)),
                next_slot: planned.feeds.map(|(_, slot)| slot),
                previous_match_ids: planned.previous.iter().map(|i| id_of(*i)).collect(),
                match_server: None,
                started_at: None,
                finished_at: None,
            })
            .collect();

        let record = TournamentRecord {
            id: tournament_id,
            size: tournament.size,
            mode: tournament.mode,
            status: TournamentStatus::InProgress,
            players: tournament.players,
            winner_id: None,
            created_at: now,
            finished_at: None,
        };

        tables.tournaments.insert(tournament_id, record.clone());
        for m in &matches {
            tables.matches.insert(m.id, m.clone());
        }

        info!(
            "Persisted tournament {} with {} matches",
            tournament_id,
            matches.len()
        );

        Ok(CreatedTournament {
            tournament: record,
            matches,
        })
    }

    async fn find_tournament(&self, tournament_id: TournamentId) -> Result<TournamentRecord> {
        self.read()?
            .tournaments
            .get(&tournament_id)
            .cloned()
            .ok_or_else(|| TournamentError::TournamentNotFound { tournament_id }.into())
    }

    async fn find_match(&self, match_id: MatchId) -> Result<MatchRecord> {
        self.read()?
            .matches
            .get(&match_id)
            .cloned()
            .ok_or_else(|| TournamentError::MatchNotFound { match_id }.into())
    }

    async fn find_matches(&self, tournament_id: TournamentId) -> Result<Vec<MatchRecord>> {
        let tables = self.read()?;
        if !tables.tournaments.contains_key(&tournament_id) {
            return Err(TournamentError::TournamentNotFound { tournament_id }.into());
        }

        let mut matches: Vec<MatchRecord> = tables
            .matches
            .values()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.round.cmp(&a.round).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn record_match_result(
        &self,
        match_id: MatchId,
        score: MatchScore,
        winner_id: PlayerId,
    ) -> Result<RecordedResult> {
        let mut tables = self.write()?;

        let current = tables
            .matches
            .get(&match_id)
            .cloned()
            .ok_or(TournamentError::MatchNotFound { match_id })?;

        if current.status == MatchStatus::Finished {
            return Err(TournamentError::MatchAlreadyResolved { match_id }.into());
        }
        if current.players().is_none() {
            return Err(TournamentError::MatchMissingPlayers { match_id }.into());
        }
        if current.loser_of(winner_id).is_none() {
            return Err(TournamentError::invalid(format!(
                "winner {} did not play match {}",
                winner_id, match_id
            ))
            .into());
        }
        if current.status != MatchStatus::InProgress {
            return Err(TournamentError::MatchNotInProgress { match_id }.into());
        }

        let now = current_timestamp();
        let mut record = current;
        record.player1_score = Some(score.player1);
        record.player2_score = Some(score.player2);
        record.winner_id = Some(winner_id);
        record.status = MatchStatus::Finished;
        record.finished_at = Some(now);
        tables.matches.insert(match_id, record.clone());

        let advanced_to = match (record.next_match_id, record.next_slot) {
            (Some(parent_id), Some(slot)) => {
                let parent = tables
                    .matches
                    .get_mut(&parent_id)
                    .ok_or(TournamentError::MatchNotFound {
                        match_id: parent_id,
                    })?;
                match slot {
                    MatchSlot::First => parent.player1_id = Some(winner_id),
                    MatchSlot::Second => parent.player2_id = Some(winner_id),
                }
                Some((parent_id, slot))
            }
            _ => None,
        };

        Ok(RecordedResult {
            record,
            advanced_to,
        })
    }

    async fn mark_match_started(
        &self,
        match_id: MatchId,
        match_server: &str,
    ) -> Result<MatchRecord> {
        let mut tables = self.write()?;
        let record = tables
            .matches
            .get_mut(&match_id)
            .ok_or(TournamentError::MatchNotFound { match_id })?;

        if record.status == MatchStatus::Finished {
            return Err(TournamentError::MatchAlreadyResolved { match_id }.into());
        }
        if record.players().is_none() {
            return Err(TournamentError::MatchMissingPlayers { match_id }.into());
        }

        record.status = MatchStatus::InProgress;
        record.match_server = Some(match_server.to_string());
        record.started_at.get_or_insert_with(current_timestamp);
        Ok(record.clone())
    }

    async fn finish_tournament(
        &self,
        tournament_id: TournamentId,
        winner_id: Option<PlayerId>,
    ) -> Result<TournamentRecord> {
        let mut tables = self.write()?;
        let record = tables
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(TournamentError::TournamentNotFound { tournament_id })?;

        if record.status != TournamentStatus::Finished {
            record.status = TournamentStatus::Finished;
            record.winner_id = winner_id;
            record.finished_at = Some(current_timestamp());
            info!(
                "Tournament {} finished, winner {:?}",
                tournament_id, winner_id
            );
        }
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::build_bracket;
    use crate::error::as_tournament_error;

    async fn create_test_tournament(
        repository: &InMemoryTournamentRepository,
    ) -> CreatedTournament {
        let players = vec![1, 2, 3, 4];
        let plan = build_bracket(TournamentSize::Four, &players).unwrap();
        repository
            .create_tournament_with_bracket(
                NewTournament {
                    mode: TournamentMode::Auto,
                    size: TournamentSize::Four,
                    players,
                },
                &plan,
            )
            .await
            .unwrap()
    }

    fn score(player1: u32, player2: u32) -> MatchScore {
        MatchScore { player1, player2 }
    }

    #[tokio::test]
    async fn test_bracket_links_are_persisted() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;

        let final_match = &created.matches[0];
        assert_eq!(final_match.round, 2);
        assert_eq!(final_match.previous_match_ids.len(), 2);

        for leaf_id in &final_match.previous_match_ids {
            let leaf = repository.find_match(*leaf_id).await.unwrap();
            assert_eq!(leaf.next_match_id, Some(final_match.id));
            assert!(leaf.players().is_some());
        }

        let matches = repository.find_matches(created.tournament.id).await.unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].round, 4);
        assert_eq!(matches[2].round, 2);
    }

    #[tokio::test]
    async fn test_record_result_advances_winner() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;
        let leaves = created.match_ids_in_round(4);
        for leaf in &leaves {
            repository.mark_match_started(*leaf, "alpha").await.unwrap();
        }

        let first = repository
            .record_match_result(leaves[0], score(3, 1), 1)
            .await
            .unwrap();
        assert_eq!(first.record.status, MatchStatus::Finished);
        assert_eq!(
            first.advanced_to,
            Some((created.matches[0].id, MatchSlot::First))
        );

        repository
            .record_match_result(leaves[1], score(0, 2), 4)
            .await
            .unwrap();

        let final_match = repository.find_match(created.matches[0].id).await.unwrap();
        assert_eq!(final_match.players(), Some((1, 4)));
    }

    #[tokio::test]
    async fn test_repeat_result_is_rejected() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;
        let leaf = created.match_ids_in_round(4)[0];
        repository.mark_match_started(leaf, "alpha").await.unwrap();

        repository
            .record_match_result(leaf, score(1, 0), 1)
            .await
            .unwrap();
        let err = repository
            .record_match_result(leaf, score(0, 1), 2)
            .await
            .unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::MatchAlreadyResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_result_validation() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;

        let err = repository
            .record_match_result(created.matches[0].id, score(1, 0), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::MatchMissingPlayers { .. })
        ));

        let leaf = created.match_ids_in_round(4)[0];
        let err = repository
            .record_match_result(leaf, score(1, 0), 3)
            .await
            .unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::InvalidPayload { .. })
        ));

        assert!(repository
            .record_match_result(999, score(1, 0), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_result_for_unstarted_match_is_rejected() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;
        let leaf = created.match_ids_in_round(4)[0];

        let err = repository
            .record_match_result(leaf, score(3, 0), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::MatchNotInProgress { .. })
        ));

        let untouched = repository.find_match(leaf).await.unwrap();
        assert_eq!(untouched.status, MatchStatus::NotStarted);
        assert!(untouched.winner_id.is_none());
        let final_match = repository.find_match(created.matches[0].id).await.unwrap();
        assert!(final_match.player1_id.is_none());
    }

    #[tokio::test]
    async fn test_mark_started_and_finish() {
        let repository = InMemoryTournamentRepository::new();
        let created = create_test_tournament(&repository).await;
        let leaf = created.match_ids_in_round(4)[0];

        let started = repository.mark_match_started(leaf, "alpha").await.unwrap();
        assert_eq!(started.status, MatchStatus::InProgress);
        assert_eq!(started.match_server.as_deref(), Some("alpha"));

        let finished = repository
            .finish_tournament(created.tournament.id, Some(1))
            .await
            .unwrap();
        assert_eq!(finished.status, TournamentStatus::Finished);
        assert_eq!(finished.winner_id, Some(1));
        assert_eq!(repository.tournament_count().unwrap(), 1);
    }
}
