//! Custom rooms: invite-only waiting rooms that start a CUSTOM tournament
//!
//! A room is stored as a hash (`custom-room:{id}`) plus a member set, an invite set
//! and an ordered join list. The host is always the head of the join list. Each
//! seated player also carries a `user-room:{player}` pointer so departures can be
//! resolved from the player alone.

use crate::error::{Result, TournamentError};
use crate::store::keyspace::{SharedStore, Transaction};
use crate::types::{PlayerId, RoomId, TournamentSize};
use crate::utils::{current_timestamp, generate_room_id, parse_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Default lifetime of an idle room
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(10 * 60);

fn room_key(room_id: RoomId) -> String {
    format!("custom-room:{}", room_id)
}

fn users_key(room_id: RoomId) -> String {
    format!("custom-room:{}:users", room_id)
}

fn invited_key(room_id: RoomId) -> String {
    format!("custom-room:{}:invited", room_id)
}

fn order_key(room_id: RoomId) -> String {
    format!("custom-room:{}:order", room_id)
}

fn seat_key(player_id: PlayerId) -> String {
    format!("user-room:{}", player_id)
}

/// Snapshot of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub host: PlayerId,
    pub size: TournamentSize,
    /// Members in join order, host first
    pub members: Vec<PlayerId>,
    pub invited: Vec<PlayerId>,
    pub created_at: DateTime<Utc>,
}

impl RoomInfo {
    pub fn max_players(&self) -> usize {
        self.size.players() as usize
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_players()
    }
}

/// Result of a player leaving their room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: RoomId,
    /// Set when the departing player was host and someone remains
    pub new_host: Option<PlayerId>,
    /// The room was deleted because nobody remains
    pub deleted: bool,
    /// Remaining members in join order
    pub remaining: Vec<PlayerId>,
}

/// Custom room storage
#[derive(Debug, Clone)]
pub struct RoomStore {
    store: SharedStore,
    ttl: Duration,
}

impl RoomStore {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn parse_room_id(raw: &str) -> Result<RoomId> {
        Uuid::parse_str(raw).map_err(|e| {
            TournamentError::Store {
                message: format!("Corrupt room pointer '{}': {}", raw, e),
            }
            .into()
        })
    }

    fn ids(raw: Vec<String>) -> Vec<PlayerId> {
        raw.iter().filter_map(|id| parse_id(id)).collect()
    }

    fn room_exists(tx: &mut Transaction<'_>, room_id: RoomId) -> bool {
        tx.exists(&room_key(room_id))
    }

    fn seated_room(tx: &mut Transaction<'_>, player_id: PlayerId) -> Result<Option<RoomId>> {
        match tx.get(&seat_key(player_id))? {
            Some(raw) => Ok(Some(Self::parse_room_id(&raw)?)),
            None => Ok(None),
        }
    }

    fn refresh(&self, tx: &mut Transaction<'_>, room_id: RoomId) -> Result<()> {
        tx.expire_prefix(&room_key(room_id), self.ttl);
        for member in tx.lrange(&order_key(room_id))? {
            tx.expire(&format!("user-room:{}", member), self.ttl);
        }
        Ok(())
    }

    fn read_info(tx: &mut Transaction<'_>, room_id: RoomId) -> Result<RoomInfo> {
        let meta = tx.hgetall(&room_key(room_id))?;
        if meta.is_empty() {
            return Err(TournamentError::RoomNotFound { room_id }.into());
        }

        let field = |name: &str| {
            meta.get(name).cloned().ok_or_else(|| TournamentError::Store {
                message: format!("Room {} is missing field '{}'", room_id, name),
            })
        };

        let host = parse_id(&field("host")?).ok_or_else(|| TournamentError::Store {
            message: format!("Room {} has a corrupt host", room_id),
        })?;
        let size = field("size")?
            .parse::<u32>()
            .ok()
            .and_then(|raw| TournamentSize::try_from(raw).ok())
            .ok_or_else(|| TournamentError::Store {
                message: format!("Room {} has a corrupt size", room_id),
            })?;
        let created_at = field("created_at")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| TournamentError::Store {
                message: format!("Room {} has a corrupt timestamp: {}", room_id, e),
            })?;

        Ok(RoomInfo {
            room_id,
            host,
            size,
            members: Self::ids(tx.lrange(&order_key(room_id))?),
            invited: Self::ids(tx.smembers(&invited_key(room_id))?),
            created_at,
        })
    }

    /// Open a room hosted by `host`. A player seated elsewhere cannot host.
    pub async fn create(&self, host: PlayerId, size: TournamentSize) -> Result<RoomId> {
        let room_id = generate_room_id();

        self.store
            .atomic(|tx| {
                if let Some(existing) = Self::seated_room(tx, host)? {
                    return Err(TournamentError::AlreadyInRoom {
                        room_id: existing,
                        player_id: host,
                    }
                    .into());
                }

                let key = room_key(room_id);
                tx.hset(&key, "host", host.to_string())?;
                tx.hset(&key, "size", size.players().to_string())?;
                tx.hset(&key, "created_at", current_timestamp().to_rfc3339())?;
                tx.sadd(&users_key(room_id), host.to_string())?;
                tx.rpush(&order_key(room_id), host.to_string())?;
                tx.set(&seat_key(host), room_id.to_string());
                self.refresh(tx, room_id)
            })
            .await?;

        info!("Room {} created by host {} for size {}", room_id, host, size);
        Ok(room_id)
    }

    /// Add a player to the invite list
    pub async fn invite(&self, room_id: RoomId, player_id: PlayerId) -> Result<()> {
        self.store
            .atomic(|tx| {
                if !Self::room_exists(tx, room_id) {
                    return Err(TournamentError::RoomNotFound { room_id }.into());
                }
                if tx.sismember(&users_key(room_id), &player_id.to_string())? {
                    return Err(TournamentError::AlreadyInRoom { room_id, player_id }.into());
                }
                tx.sadd(&invited_key(room_id), player_id.to_string())?;
                self.refresh(tx, room_id)
            })
            .await?;

        debug!("Player {} invited to room {}", player_id, room_id);
        Ok(())
    }

    pub async fn is_invited(&self, room_id: RoomId, player_id: PlayerId) -> Result<bool> {
        self.store
            .atomic(|tx| tx.sismember(&invited_key(room_id), &player_id.to_string()))
            .await
    }

    pub async fn is_host(&self, room_id: RoomId, player_id: PlayerId) -> Result<bool> {
        let host = self
            .store
            .atomic(|tx| tx.hget(&room_key(room_id), "host"))
            .await?;
        Ok(host.and_then(|raw| parse_id(&raw)) == Some(player_id))
    }

    /// Members in join order, host first
    pub async fn members(&self, room_id: RoomId) -> Result<Vec<PlayerId>> {
        let raw = self.store.atomic(|tx| tx.lrange(&order_key(room_id))).await?;
        Ok(Self::ids(raw))
    }

    pub async fn info(&self, room_id: RoomId) -> Result<RoomInfo> {
        self.store.atomic(|tx| Self::read_info(tx, room_id)).await
    }

    /// The room a player is currently seated in
    pub async fn room_of(&self, player_id: PlayerId) -> Result<Option<RoomId>> {
        self.store
            .atomic(|tx| Self::seated_room(tx, player_id))
            .await
    }

    /// Seat reservation. Checks and insert happen in one atomic operation, so two
    /// concurrent joins can never both take the last seat.
    pub async fn join(&self, room_id: RoomId, player_id: PlayerId) -> Result<RoomInfo> {
        let info = self
            .store
            .atomic(|tx| {
                if !Self::room_exists(tx, room_id) {
                    return Err(TournamentError::RoomNotFound { room_id }.into());
                }

                let member = player_id.to_string();
                if tx.sismember(&users_key(room_id), &member)? {
                    return Err(TournamentError::AlreadyInRoom { room_id, player_id }.into());
                }
                if let Some(other) = Self::seated_room(tx, player_id)? {
                    return Err(TournamentError::AlreadyInRoom {
                        room_id: other,
                        player_id,
                    }
                    .into());
                }

                let info = Self::read_info(tx, room_id)?;
                if info.is_full() {
                    return Err(TournamentError::RoomFull { room_id }.into());
                }
                if !tx.sismember(&invited_key(room_id), &member)? {
                    return Err(TournamentError::NotInvited { room_id, player_id }.into());
                }

                tx.sadd(&users_key(room_id), member.clone())?;
                tx.srem(&invited_key(room_id), &member)?;
                tx.rpush(&order_key(room_id), member)?;
                tx.set(&seat_key(player_id), room_id.to_string());
                self.refresh(tx, room_id)?;
                Self::read_info(tx, room_id)
            })
            .await?;

        info!(
            "Player {} joined room {} ({}/{})",
            player_id,
            room_id,
            info.members.len(),
            info.max_players()
        );
        Ok(info)
    }

    /// Remove a player from whatever room they are seated in.
    ///
    /// When the host leaves, the next member in join order becomes host. The room is
    /// deleted once nobody remains. Returns `None` if the player was not seated.
    pub async fn leave(&self, player_id: PlayerId) -> Result<Option<LeaveOutcome>> {
        let outcome = self
            .store
            .atomic(|tx| {
                let Some(room_id) = Self::seated_room(tx, player_id)? else {
                    return Ok(None);
                };
                tx.del(&seat_key(player_id));

                if !Self::room_exists(tx, room_id) {
                    return Ok(None);
                }

                let member = player_id.to_string();
                let was_host = tx.hget(&room_key(room_id), "host")?.as_deref() == Some(&*member);

                if was_host {
                    tx.lpop(&order_key(room_id))?;
                }
                tx.lrem(&order_key(room_id), &member, 0)?;
                tx.srem(&users_key(room_id), &member)?;
                tx.srem(&invited_key(room_id), &member)?;

                let remaining = Self::ids(tx.lrange(&order_key(room_id))?);
                if remaining.is_empty() {
                    tx.del_prefix(&room_key(room_id));
                    return Ok(Some(LeaveOutcome {
                        room_id,
                        new_host: None,
                        deleted: true,
                        remaining,
                    }));
                }

                let new_host = if was_host {
                    let head = remaining[0];
                    tx.hset(&room_key(room_id), "host", head.to_string())?;
                    Some(head)
                } else {
                    None
                };
                self.refresh(tx, room_id)?;

                Ok(Some(LeaveOutcome {
                    room_id,
                    new_host,
                    deleted: false,
                    remaining,
                }))
            })
            .await?;

        match &outcome {
            Some(LeaveOutcome {
                room_id,
                deleted: true,
                ..
            }) => info!("Player {} left room {}; room deleted", player_id, room_id),
            Some(LeaveOutcome {
                room_id,
                new_host: Some(host),
                ..
            }) => info!(
                "Host {} left room {}; player {} is now host",
                player_id, room_id, host
            ),
            Some(outcome) => debug!("Player {} left room {}", player_id, outcome.room_id),
            None => debug!("Player {} was not seated in any room", player_id),
        }

        Ok(outcome)
    }

    /// Transport-level disconnection of a seated player
    pub async fn disconnected_user(&self, player_id: PlayerId) -> Result<Option<LeaveOutcome>> {
        self.leave(player_id).await
    }

    /// Check that `host` may start a full room, then delete it and release
    /// every seat in the same step. Returns the room as it was.
    ///
    /// Only one start can succeed; a repeated start finds no room.
    pub async fn take_for_start(&self, room_id: RoomId, host: PlayerId) -> Result<RoomInfo> {
        let info = self
            .store
            .atomic(|tx| {
                let info = Self::read_info(tx, room_id)?;
                if info.host != host {
                    return Err(TournamentError::NotHost {
                        room_id,
                        player_id: host,
                    }
                    .into());
                }
                if !info.is_full() {
                    return Err(TournamentError::RoomNotFull {
                        room_id,
                        current: info.members.len(),
                        required: info.max_players(),
                    }
                    .into());
                }

                for member in &info.members {
                    tx.del(&seat_key(*member));
                }
                tx.del_prefix(&room_key(room_id));
                Ok(info)
            })
            .await?;

        info!(
            "Room {} taken for start with {} players",
            room_id,
            info.members.len()
        );
        Ok(info)
    }
}
