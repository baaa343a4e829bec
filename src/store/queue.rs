//! FIFO waiting queues, one per tournament size

use crate::error::{Result, TournamentError};
use crate::store::keyspace::SharedStore;
use crate::types::{PlayerId, TournamentSize};
use crate::utils::parse_id;
use tracing::{debug, info};

fn queue_key(size: TournamentSize) -> String {
    format!("waiting-queue:{}", size)
}

fn decode_players(raw: Vec<String>) -> Vec<PlayerId> {
    raw.iter().filter_map(|id| parse_id(id)).collect()
}

/// Waiting queues keyed by cohort size
#[derive(Debug, Clone)]
pub struct QueueStore {
    store: SharedStore,
}

impl QueueStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Append a player to the tail of the queue. Not idempotent; check
    /// [`QueueStore::is_queued`] first.
    pub async fn enqueue(&self, size: TournamentSize, player_id: PlayerId) -> Result<usize> {
        let key = queue_key(size);
        let len = self
            .store
            .atomic(|tx| tx.rpush(&key, player_id.to_string()))
            .await?;
        debug!("Player {} queued for size {} ({} waiting)", player_id, size, len);
        Ok(len)
    }

    /// Append a player unless they are already waiting in this queue
    pub async fn enqueue_unique(&self, size: TournamentSize, player_id: PlayerId) -> Result<usize> {
        let key = queue_key(size);
        let member = player_id.to_string();
        let len = self
            .store
            .atomic(|tx| {
                if tx.lrange(&key)?.contains(&member) {
                    return Err(TournamentError::AlreadyQueued {
                        player_id,
                        size: size.players(),
                    }
                    .into());
                }
                tx.rpush(&key, member.clone())
            })
            .await?;
        debug!("Player {} queued for size {} ({} waiting)", player_id, size, len);
        Ok(len)
    }

    pub async fn is_queued(&self, size: TournamentSize, player_id: PlayerId) -> Result<bool> {
        let key = queue_key(size);
        let needle = player_id.to_string();
        self.store
            .atomic(|tx| Ok(tx.lrange(&key)?.iter().any(|id| *id == needle)))
            .await
    }

    pub async fn len(&self, size: TournamentSize) -> Result<usize> {
        let key = queue_key(size);
        self.store.atomic(|tx| tx.llen(&key)).await
    }

    /// Queued players, oldest first
    pub async fn players(&self, size: TournamentSize) -> Result<Vec<PlayerId>> {
        let key = queue_key(size);
        let raw = self.store.atomic(|tx| tx.lrange(&key)).await?;
        Ok(decode_players(raw))
    }

    /// Whether a full cohort is waiting
    pub async fn is_ready(&self, size: TournamentSize) -> Result<bool> {
        Ok(self.len(size).await? >= size.players() as usize)
    }

    /// Remove and return exactly `size` players in FIFO order.
    ///
    /// Fails with `QueueUnderflow` and leaves the queue untouched when fewer
    /// players are waiting.
    pub async fn drain(&self, size: TournamentSize) -> Result<Vec<PlayerId>> {
        let key = queue_key(size);
        let wanted = size.players() as usize;

        let raw = self
            .store
            .atomic(|tx| {
                let available = tx.llen(&key)?;
                if available < wanted {
                    return Err(TournamentError::QueueUnderflow {
                        size: size.players(),
                        available,
                    }
                    .into());
                }

                let mut drained = Vec::with_capacity(wanted);
                for _ in 0..wanted {
                    if let Some(id) = tx.lpop(&key)? {
                        drained.push(id);
                    }
                }
                Ok(drained)
            })
            .await?;

        let players = decode_players(raw);
        info!("Drained {} players from queue {}", players.len(), size);
        Ok(players)
    }

    /// Remove one occurrence of a player; returns whether anything was removed
    pub async fn remove(&self, size: TournamentSize, player_id: PlayerId) -> Result<bool> {
        let key = queue_key(size);
        let removed = self
            .store
            .atomic(|tx| tx.lrem(&key, &player_id.to_string(), 1))
            .await?;
        Ok(removed > 0)
    }
}
