//! Short-lived cache of player profiles

use crate::error::Result;
use crate::store::keyspace::SharedStore;
use crate::types::{PlayerId, PlayerProfile};
use std::time::Duration;

/// Default lifetime of a cached profile
pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(30 * 60);

fn profile_key(player_id: PlayerId) -> String {
    format!("player:{}", player_id)
}

#[derive(Debug, Clone)]
pub struct ProfileCache {
    store: SharedStore,
    ttl: Duration,
}

impl ProfileCache {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn get(&self, player_id: PlayerId) -> Result<Option<PlayerProfile>> {
        let key = profile_key(player_id);
        let fields = self.store.atomic(|tx| tx.hgetall(&key)).await?;

        match (fields.get("nickname"), fields.get("avatarUrl")) {
            (Some(nickname), Some(avatar_url)) => Ok(Some(PlayerProfile {
                id: player_id,
                nickname: nickname.clone(),
                avatar_url: avatar_url.clone(),
            })),
            _ => Ok(None),
        }
    }

    /// Cache a profile. Placeholders are never cached.
    pub async fn put(&self, profile: &PlayerProfile) -> Result<()> {
        if profile.is_placeholder() {
            return Ok(());
        }

        let key = profile_key(profile.id);
        self.store
            .atomic(|tx| {
                tx.hset(&key, "id", profile.id.to_string())?;
                tx.hset(&key, "nickname", profile.nickname.clone())?;
                tx.hset(&key, "avatarUrl", profile.avatar_url.clone())?;
                tx.expire(&key, self.ttl);
                Ok(())
            })
            .await
    }
}
