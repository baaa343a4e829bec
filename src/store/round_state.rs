//! Tournament round pointer, status and per-round match sets
//!
//! Rounds are numbered by players remaining: a size-8 tournament plays round 8,
//! then 4, then the final at round 2.

use crate::error::{Result, TournamentError};
use crate::store::keyspace::{SharedStore, Transaction};
use crate::store::player_state::tournament_prefix;
use crate::types::{MatchId, TournamentId, TournamentMode, TournamentSize, TournamentStatus};
use crate::utils::parse_id;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

fn meta_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:meta", tournament_id)
}

fn state_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:state", tournament_id)
}

fn round_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:currentRound", tournament_id)
}

fn matches_key(tournament_id: TournamentId, round: u32) -> String {
    format!("tournament:{}:round:{}:matches", tournament_id, round)
}

/// Immutable tournament metadata written at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentMeta {
    pub mode: TournamentMode,
    pub size: TournamentSize,
}

/// Snapshot of a tournament's round state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    pub tournament_id: TournamentId,
    pub mode: TournamentMode,
    pub size: TournamentSize,
    pub status: TournamentStatus,
    pub current_round: u32,
}

/// Outcome of an attempt to advance the round pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundAdvance {
    /// The pointer moved to this round
    Advanced(u32),
    /// The final was played; status is now FINISHED
    Finished,
    /// Nothing changed because the tournament had already finished
    AlreadyFinished,
    /// The round still has unresolved matches
    RoundPending { remaining: usize },
    /// Another caller already advanced past the expected round
    NotCurrentRound { current: u32 },
}

/// Round progress per tournament
#[derive(Debug, Clone)]
pub struct RoundStateStore {
    store: SharedStore,
    ttl: Duration,
}

impl RoundStateStore {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn refresh(&self, tx: &mut Transaction<'_>, tournament_id: TournamentId) {
        tx.expire_prefix(&tournament_prefix(tournament_id), self.ttl);
    }

    fn read_info(tx: &mut Transaction<'_>, tournament_id: TournamentId) -> Result<RoundInfo> {
        let meta = tx.hgetall(&meta_key(tournament_id))?;
        if meta.is_empty() {
            return Err(TournamentError::TournamentNotFound { tournament_id }.into());
        }

        let corrupt = |what: &str| TournamentError::Store {
            message: format!("Tournament {} has a corrupt {}", tournament_id, what),
        };

        let mode = meta
            .get("mode")
            .and_then(|raw| TournamentMode::parse(raw))
            .ok_or_else(|| corrupt("mode"))?;
        let size = meta
            .get("size")
            .and_then(|raw| raw.parse::<u32>().ok())
            .and_then(|raw| TournamentSize::try_from(raw).ok())
            .ok_or_else(|| corrupt("size"))?;
        let status = tx
            .get(&state_key(tournament_id))?
            .and_then(|raw| TournamentStatus::parse(&raw))
            .ok_or_else(|| corrupt("status"))?;
        let current_round = tx
            .get(&round_key(tournament_id))?
            .and_then(|raw| raw.parse::<u32>().ok())
            .ok_or_else(|| corrupt("round pointer"))?;

        Ok(RoundInfo {
            tournament_id,
            mode,
            size,
            status,
            current_round,
        })
    }

    fn advance(tx: &mut Transaction<'_>, info: &RoundInfo) -> RoundAdvance {
        if info.status == TournamentStatus::Finished {
            return RoundAdvance::AlreadyFinished;
        }

        let next = info.current_round / 2;
        if next <= 1 {
            tx.set(
                &state_key(info.tournament_id),
                TournamentStatus::Finished.as_str(),
            );
            RoundAdvance::Finished
        } else {
            tx.set(&round_key(info.tournament_id), next.to_string());
            RoundAdvance::Advanced(next)
        }
    }

    /// Initialize a tournament. Fails if one already exists under this id.
    pub async fn create(&self, tournament_id: TournamentId, meta: TournamentMeta) -> Result<()> {
        self.store
            .atomic(|tx| {
                if tx.exists(&meta_key(tournament_id)) {
                    return Err(TournamentError::TournamentAlreadyExists { tournament_id }.into());
                }
                tx.hset(&meta_key(tournament_id), "mode", meta.mode.as_str())?;
                tx.hset(
                    &meta_key(tournament_id),
                    "size",
                    meta.size.players().to_string(),
                )?;
                tx.set(
                    &state_key(tournament_id),
                    TournamentStatus::InProgress.as_str(),
                );
                tx.set(&round_key(tournament_id), meta.size.players().to_string());
                self.refresh(tx, tournament_id);
                Ok(())
            })
            .await?;

        info!(
            "Tournament {} round state created ({} {})",
            tournament_id, meta.mode, meta.size
        );
        Ok(())
    }

    pub async fn add_matches(
        &self,
        tournament_id: TournamentId,
        round: u32,
        match_ids: &[MatchId],
    ) -> Result<()> {
        self.store
            .atomic(|tx| {
                for match_id in match_ids {
                    tx.sadd(&matches_key(tournament_id, round), match_id.to_string())?;
                }
                self.refresh(tx, tournament_id);
                Ok(())
            })
            .await
    }

    /// Remove a resolved match from its round; returns whether it was present
    pub async fn remove_match(
        &self,
        tournament_id: TournamentId,
        round: u32,
        match_id: MatchId,
    ) -> Result<bool> {
        self.store
            .atomic(|tx| {
                let removed = tx.srem(&matches_key(tournament_id, round), &match_id.to_string())?;
                self.refresh(tx, tournament_id);
                Ok(removed)
            })
            .await
    }

    /// Unresolved matches in a round, ascending
    pub async fn matches_in_round(
        &self,
        tournament_id: TournamentId,
        round: u32,
    ) -> Result<Vec<MatchId>> {
        let raw = self
            .store
            .atomic(|tx| tx.smembers(&matches_key(tournament_id, round)))
            .await?;
        let mut ids: Vec<MatchId> = raw.iter().filter_map(|id| parse_id(id)).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    pub async fn is_empty_in_round(&self, tournament_id: TournamentId, round: u32) -> Result<bool> {
        let remaining = self
            .store
            .atomic(|tx| tx.scard(&matches_key(tournament_id, round)))
            .await?;
        Ok(remaining == 0)
    }

    /// Halve the round pointer, finishing the tournament when the final was played
    pub async fn move_to_next_round(&self, tournament_id: TournamentId) -> Result<RoundAdvance> {
        let advance = self
            .store
            .atomic(|tx| {
                let info = Self::read_info(tx, tournament_id)?;
                let advance = Self::advance(tx, &info);
                self.refresh(tx, tournament_id);
                Ok(advance)
            })
            .await?;

        debug!("Tournament {} advance: {:?}", tournament_id, advance);
        Ok(advance)
    }

    /// Compare-and-swap advance: only moves the pointer when it still equals
    /// `expected_round` and that round has no unresolved matches.
    pub async fn advance_from(
        &self,
        tournament_id: TournamentId,
        expected_round: u32,
    ) -> Result<RoundAdvance> {
        let advance = self
            .store
            .atomic(|tx| {
                let info = Self::read_info(tx, tournament_id)?;
                if info.status == TournamentStatus::Finished {
                    return Ok(RoundAdvance::AlreadyFinished);
                }
                if info.current_round != expected_round {
                    return Ok(RoundAdvance::NotCurrentRound {
                        current: info.current_round,
                    });
                }
                let remaining = tx.scard(&matches_key(tournament_id, expected_round))?;
                if remaining > 0 {
                    return Ok(RoundAdvance::RoundPending { remaining });
                }
                let advance = Self::advance(tx, &info);
                self.refresh(tx, tournament_id);
                Ok(advance)
            })
            .await?;

        match advance {
            RoundAdvance::Advanced(round) => {
                info!("Tournament {} advanced to round {}", tournament_id, round)
            }
            RoundAdvance::Finished => info!("Tournament {} finished", tournament_id),
            other => debug!("Tournament {} not advanced: {:?}", tournament_id, other),
        }
        Ok(advance)
    }

    pub async fn info(&self, tournament_id: TournamentId) -> Result<RoundInfo> {
        self.store
            .atomic(|tx| Self::read_info(tx, tournament_id))
            .await
    }

    pub async fn current_round(&self, tournament_id: TournamentId) -> Result<u32> {
        Ok(self.info(tournament_id).await?.current_round)
    }

    pub async fn status(&self, tournament_id: TournamentId) -> Result<TournamentStatus> {
        Ok(self.info(tournament_id).await?.status)
    }

    pub async fn is_finished(&self, tournament_id: TournamentId) -> Result<bool> {
        Ok(self.status(tournament_id).await? == TournamentStatus::Finished)
    }
}
