//! Cache-first profile resolution with placeholder fallback

use crate::profile::client::ProfileService;
use crate::store::ProfileCache;
use crate::types::{PlayerId, PlayerProfile};
use futures::future::join_all;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct ProfileDirectory {
    service: Arc<dyn ProfileService>,
    cache: ProfileCache,
}

impl ProfileDirectory {
    pub fn new(service: Arc<dyn ProfileService>, cache: ProfileCache) -> Self {
        Self { service, cache }
    }

    /// Resolve a profile. Never fails: lookup errors yield a placeholder.
    pub async fn resolve(&self, player_id: PlayerId) -> PlayerProfile {
        match self.cache.get(player_id).await {
            Ok(Some(profile)) => return profile,
            Ok(None) => {}
            Err(e) => warn!("Profile cache read failed for player {}: {}", player_id, e),
        }

        match self.service.fetch_profile(player_id).await {
            Ok(profile) => {
                if let Err(e) = self.cache.put(&profile).await {
                    warn!("Failed to cache profile for player {}: {}", player_id, e);
                }
                profile
            }
            Err(e) => {
                warn!("Profile lookup failed for player {}: {}", player_id, e);
                PlayerProfile::placeholder(player_id)
            }
        }
    }

    /// Resolve several profiles concurrently, preserving order
    pub async fn resolve_many(&self, player_ids: &[PlayerId]) -> Vec<PlayerProfile> {
        join_all(player_ids.iter().map(|id| self.resolve(*id))).await
    }

    /// Warm the cache; returns how many real profiles are now available
    pub async fn prefetch(&self, player_ids: &[PlayerId]) -> usize {
        self.resolve_many(player_ids)
            .await
            .iter()
            .filter(|profile| !profile.is_placeholder())
            .count()
    }
}
