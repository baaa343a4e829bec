//! Registry of game servers and their current load

use crate::error::{Result, TournamentError};
use crate::store::keyspace::SharedStore;
use tracing::debug;

const SERVER_PREFIX: &str = "match-server:";

fn count_key(name: &str) -> String {
    format!("match-server:{}:game-count", name)
}

/// A match server and the number of games it is hosting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchServer {
    pub name: String,
    pub game_count: i64,
}

#[derive(Debug, Clone)]
pub struct MatchServerRegistry {
    store: SharedStore,
}

impl MatchServerRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Register a server, keeping its count if it is already known
    pub async fn register(&self, name: &str) -> Result<()> {
        let key = count_key(name);
        self.store
            .atomic(|tx| {
                if !tx.exists(&key) {
                    tx.set(&key, "0");
                }
                Ok(())
            })
            .await?;
        debug!("Match server {} registered", name);
        Ok(())
    }

    pub async fn set_game_count(&self, name: &str, count: i64) -> Result<()> {
        let key = count_key(name);
        self.store
            .atomic(|tx| {
                tx.set(&key, count.to_string());
                Ok(())
            })
            .await
    }

    /// Adjust a server's count, e.g. +1 when a match is assigned to it
    pub async fn adjust_game_count(&self, name: &str, delta: i64) -> Result<i64> {
        let key = count_key(name);
        self.store.atomic(|tx| tx.incr_by(&key, delta)).await
    }

    pub async fn servers(&self) -> Result<Vec<MatchServer>> {
        self.store
            .atomic(|tx| {
                let mut servers = Vec::new();
                for key in tx.keys_with_prefix(SERVER_PREFIX) {
                    let Some(name) = key
                        .strip_prefix(SERVER_PREFIX)
                        .and_then(|rest| rest.strip_suffix(":game-count"))
                    else {
                        continue;
                    };
                    let game_count = tx
                        .get(&key)?
                        .and_then(|raw| raw.parse::<i64>().ok())
                        .unwrap_or(0);
                    servers.push(MatchServer {
                        name: name.to_string(),
                        game_count,
                    });
                }
                Ok(servers)
            })
            .await
    }

    /// The least loaded server; ties go to the name that sorts first
    pub async fn best_match_server(&self) -> Result<String> {
        self.servers()
            .await?
            .into_iter()
            .min_by(|a, b| a.game_count.cmp(&b.game_count).then(a.name.cmp(&b.name)))
            .map(|server| server.name)
            .ok_or_else(|| TournamentError::NoMatchServer.into())
    }
}
