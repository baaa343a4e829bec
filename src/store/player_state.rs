//! Per-tournament player lifecycle: NOTHING -> READY -> PLAYING -> (NOTHING | ELIMINATED)

use crate::error::{Result, TournamentError};
use crate::store::keyspace::{SharedStore, Transaction};
use crate::types::{PlayerId, PlayerState, TournamentId};
use crate::utils::parse_id;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Default lifetime of tournament keys after their last mutation
pub const DEFAULT_TOURNAMENT_TTL: Duration = Duration::from_secs(30 * 60);

pub(crate) fn tournament_prefix(tournament_id: TournamentId) -> String {
    format!("tournament:{}:", tournament_id)
}

fn players_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:players", tournament_id)
}

fn ready_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:players:ready", tournament_id)
}

fn playing_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:playing", tournament_id)
}

fn eliminated_key(tournament_id: TournamentId) -> String {
    format!("tournament:{}:eliminated", tournament_id)
}

fn id_set(raw: Vec<String>) -> BTreeSet<PlayerId> {
    raw.iter().filter_map(|id| parse_id(id)).collect()
}

/// Player readiness and elimination per tournament
#[derive(Debug, Clone)]
pub struct PlayerStateStore {
    store: SharedStore,
    ttl: Duration,
}

impl PlayerStateStore {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn state_in(
        tx: &mut Transaction<'_>,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<Option<PlayerState>> {
        let member = player_id.to_string();
        if !tx.sismember(&players_key(tournament_id), &member)? {
            return Ok(None);
        }
        let state = if tx.sismember(&eliminated_key(tournament_id), &member)? {
            PlayerState::Eliminated
        } else if tx.sismember(&playing_key(tournament_id), &member)? {
            PlayerState::Playing
        } else if tx.sismember(&ready_key(tournament_id), &member)? {
            PlayerState::Ready
        } else {
            PlayerState::Nothing
        };
        Ok(Some(state))
    }

    fn all_ready_in(tx: &mut Transaction<'_>, tournament_id: TournamentId) -> Result<bool> {
        let registered = tx.scard(&players_key(tournament_id))?;
        let eliminated = tx.scard(&eliminated_key(tournament_id))?;
        let ready = tx.scard(&ready_key(tournament_id))?;
        Ok(ready > 0 && ready == registered.saturating_sub(eliminated))
    }

    fn refresh(&self, tx: &mut Transaction<'_>, tournament_id: TournamentId) {
        tx.expire_prefix(&tournament_prefix(tournament_id), self.ttl);
    }

    /// Register the cohort; every player starts in NOTHING
    pub async fn register_players(
        &self,
        tournament_id: TournamentId,
        players: &[PlayerId],
    ) -> Result<()> {
        self.store
            .atomic(|tx| {
                for player in players {
                    tx.sadd(&players_key(tournament_id), player.to_string())?;
                }
                self.refresh(tx, tournament_id);
                Ok(())
            })
            .await?;

        debug!(
            "Registered {} players in tournament {}",
            players.len(),
            tournament_id
        );
        Ok(())
    }

    /// NOTHING -> READY. Returns `false` when the player was already ready.
    pub async fn set_ready(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<bool> {
        self.store
            .atomic(|tx| {
                match Self::state_in(tx, tournament_id, player_id)? {
                    None => Err(TournamentError::PlayerNotRegistered {
                        tournament_id,
                        player_id,
                    }
                    .into()),
                    Some(PlayerState::Eliminated) => Err(TournamentError::NotActive {
                        tournament_id,
                        player_id,
                    }
                    .into()),
                    Some(PlayerState::Playing) => Err(TournamentError::StillPlaying {
                        tournament_id,
                        player_id,
                    }
                    .into()),
                    Some(PlayerState::Ready) => Ok(false),
                    Some(PlayerState::Nothing) => {
                        tx.sadd(&ready_key(tournament_id), player_id.to_string())?;
                        self.refresh(tx, tournament_id);
                        Ok(true)
                    }
                }
            })
            .await
    }

    /// Every non-eliminated player is ready, and there is at least one
    pub async fn are_all_players_ready(&self, tournament_id: TournamentId) -> Result<bool> {
        self.store
            .atomic(|tx| Self::all_ready_in(tx, tournament_id))
            .await
    }

    /// Move every ready player to PLAYING at once
    pub async fn move_players_to_playing(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<PlayerId>> {
        let moved = self
            .store
            .atomic(|tx| {
                if !Self::all_ready_in(tx, tournament_id)? {
                    return Err(TournamentError::PlayersNotReady { tournament_id }.into());
                }

                let ready = tx.smembers(&ready_key(tournament_id))?;
                for player in &ready {
                    tx.sadd(&playing_key(tournament_id), player.clone())?;
                }
                tx.del(&ready_key(tournament_id));
                self.refresh(tx, tournament_id);
                Ok(id_set(ready).into_iter().collect::<Vec<_>>())
            })
            .await?;

        info!(
            "Tournament {}: {} players moved to PLAYING",
            tournament_id,
            moved.len()
        );
        Ok(moved)
    }

    /// PLAYING -> ELIMINATED. Returns `false` when the player was already eliminated.
    pub async fn move_to_eliminated(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<bool> {
        let moved = self
            .store
            .atomic(|tx| {
                let member = player_id.to_string();
                if !tx.srem(&playing_key(tournament_id), &member)? {
                    if tx.sismember(&eliminated_key(tournament_id), &member)? {
                        return Ok(false);
                    }
                    return Err(TournamentError::NotPlaying {
                        tournament_id,
                        player_id,
                    }
                    .into());
                }
                tx.sadd(&eliminated_key(tournament_id), member)?;
                self.refresh(tx, tournament_id);
                Ok(true)
            })
            .await?;

        if moved {
            info!("Tournament {}: player {} eliminated", tournament_id, player_id);
        }
        Ok(moved)
    }

    /// Return round survivors from PLAYING to NOTHING
    pub async fn reset_round(&self, tournament_id: TournamentId) -> Result<Vec<PlayerId>> {
        self.store
            .atomic(|tx| {
                let survivors = id_set(tx.smembers(&playing_key(tournament_id))?);
                tx.del(&playing_key(tournament_id));
                tx.del(&ready_key(tournament_id));
                self.refresh(tx, tournament_id);
                Ok(survivors.into_iter().collect())
            })
            .await
    }

    pub async fn player_state(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<Option<PlayerState>> {
        self.store
            .atomic(|tx| Self::state_in(tx, tournament_id, player_id))
            .await
    }

    pub async fn all_player_ids(&self, tournament_id: TournamentId) -> Result<Vec<PlayerId>> {
        let raw = self
            .store
            .atomic(|tx| tx.smembers(&players_key(tournament_id)))
            .await?;
        Ok(id_set(raw).into_iter().collect())
    }

    /// Registered players that have not been eliminated
    pub async fn active_player_ids(&self, tournament_id: TournamentId) -> Result<Vec<PlayerId>> {
        let (all, eliminated) = self
            .store
            .atomic(|tx| {
                Ok((
                    id_set(tx.smembers(&players_key(tournament_id))?),
                    id_set(tx.smembers(&eliminated_key(tournament_id))?),
                ))
            })
            .await?;
        Ok(all.difference(&eliminated).copied().collect())
    }

    pub async fn is_participant(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
    ) -> Result<bool> {
        self.store
            .atomic(|tx| tx.sismember(&players_key(tournament_id), &player_id.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_tournament_error;

    async fn create_test_states(players: &[PlayerId]) -> PlayerStateStore {
        let states = PlayerStateStore::new(SharedStore::new(), DEFAULT_TOURNAMENT_TTL);
        states.register_players(1, players).await.unwrap();
        states
    }

    #[tokio::test]
    async fn test_ready_flow() {
        let states = create_test_states(&[1, 2]).await;

        assert!(states.set_ready(1, 1).await.unwrap());
        assert!(!states.set_ready(1, 1).await.unwrap());
        assert!(!states.are_all_players_ready(1).await.unwrap());

        states.set_ready(1, 2).await.unwrap();
        assert!(states.are_all_players_ready(1).await.unwrap());

        let moved = states.move_players_to_playing(1).await.unwrap();
        assert_eq!(moved, vec![1, 2]);
        assert_eq!(
            states.player_state(1, 1).await.unwrap(),
            Some(PlayerState::Playing)
        );
    }

    #[tokio::test]
    async fn test_set_ready_rejections() {
        let states = create_test_states(&[1, 2]).await;

        let err = states.set_ready(1, 99).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::PlayerNotRegistered { .. })
        ));

        states.set_ready(1, 1).await.unwrap();
        states.set_ready(1, 2).await.unwrap();
        states.move_players_to_playing(1).await.unwrap();

        let err = states.set_ready(1, 1).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::StillPlaying { .. })
        ));

        states.move_to_eliminated(1, 2).await.unwrap();
        let err = states.set_ready(1, 2).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::NotActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_move_to_playing_requires_everyone() {
        let states = create_test_states(&[1, 2]).await;

        let err = states.move_players_to_playing(1).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::PlayersNotReady { .. })
        ));

        states.set_ready(1, 1).await.unwrap();
        assert!(states.move_players_to_playing(1).await.is_err());
        assert_eq!(
            states.player_state(1, 1).await.unwrap(),
            Some(PlayerState::Ready)
        );
    }

    #[tokio::test]
    async fn test_elimination_and_reset() {
        let states = create_test_states(&[1, 2, 3, 4]).await;
        for player in 1..=4 {
            states.set_ready(1, player).await.unwrap();
        }
        states.move_players_to_playing(1).await.unwrap();

        assert!(states.move_to_eliminated(1, 2).await.unwrap());
        assert!(states.move_to_eliminated(1, 4).await.unwrap());
        // Repeating an elimination changes nothing
        assert!(!states.move_to_eliminated(1, 4).await.unwrap());

        let survivors = states.reset_round(1).await.unwrap();
        assert_eq!(survivors, vec![1, 3]);
        let err = states.move_to_eliminated(1, 3).await.unwrap_err();
        assert!(matches!(
            as_tournament_error(&err),
            Some(TournamentError::NotPlaying { .. })
        ));
        assert_eq!(states.active_player_ids(1).await.unwrap(), vec![1, 3]);
        assert_eq!(
            states.player_state(1, 3).await.unwrap(),
            Some(PlayerState::Nothing)
        );

        // Two survivors left: readiness is measured against active players only
        states.set_ready(1, 1).await.unwrap();
        states.set_ready(1, 3).await.unwrap();
        assert!(states.are_all_players_ready(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_participants() {
        let states = create_test_states(&[5, 6]).await;
        assert!(states.is_participant(1, 5).await.unwrap());
        assert!(!states.is_participant(1, 7).await.unwrap());
        assert!(!states.is_participant(2, 5).await.unwrap());
        assert_eq!(states.all_player_ids(1).await.unwrap(), vec![5, 6]);
    }
}
