//! Which live session currently represents a player in each namespace

use crate::error::{Result, TournamentError};
use crate::store::keyspace::SharedStore;
use crate::types::{PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default lifetime of a session binding
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Session namespace a client connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Waiting,
    Tournament,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Waiting => "waiting",
            Namespace::Tournament => "tournament",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn binding_key(namespace: Namespace, player_id: PlayerId) -> String {
    format!("socket:{}:{}", namespace, player_id)
}

/// Session bindings: (namespace, player) -> session id
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: SharedStore,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Bind a session, replacing any previous one for this player
    pub async fn bind(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
        session_id: &str,
    ) -> Result<()> {
        let key = binding_key(namespace, player_id);
        self.store
            .atomic(|tx| {
                tx.set_ex(&key, session_id, self.ttl);
                Ok(())
            })
            .await?;
        debug!("Bound {} session {} to player {}", namespace, session_id, player_id);
        Ok(())
    }

    pub async fn session_of(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
    ) -> Result<Option<SessionId>> {
        let key = binding_key(namespace, player_id);
        self.store.atomic(|tx| tx.get(&key)).await
    }

    /// Like [`SessionStore::session_of`] but a missing binding is an error
    pub async fn require(&self, namespace: Namespace, player_id: PlayerId) -> Result<SessionId> {
        self.session_of(namespace, player_id).await?.ok_or_else(|| {
            TournamentError::SessionNotFound {
                namespace: namespace.to_string(),
                player_id,
            }
            .into()
        })
    }

    /// Remove the binding only if it still points at `session_id`; a reconnect
    /// that already replaced it is left alone.
    pub async fn unbind(
        &self,
        namespace: Namespace,
        player_id: PlayerId,
        session_id: &str,
    ) -> Result<bool> {
        let key = binding_key(namespace, player_id);
        self.store
            .atomic(|tx| {
                if tx.get(&key)?.as_deref() == Some(session_id) {
                    Ok(tx.del(&key))
                } else {
                    Ok(false)
                }
            })
            .await
    }
}
