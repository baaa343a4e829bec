//! Tournament request ledger
//!
//! Remembers which tournament each request produced, so a redelivered
//! `TournamentRequested` resumes or acknowledges the first attempt instead of
//! creating a second tournament for the same cohort.

use crate::error::Result;
use crate::store::keyspace::SharedStore;
use crate::types::TournamentId;
use crate::utils::parse_id;
use std::time::Duration;
use tracing::debug;

fn request_key(request_id: &str) -> String {
    format!("request:{}", request_id)
}

const PENDING: &str = "pending";
const CREATED: &str = "created";

/// What an earlier delivery of the same request left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClaim {
    /// First delivery; the caller owns the request now
    New,
    /// Another delivery holds the request and has not persisted anything yet
    InFlight,
    /// Persisted but never announced; initialization must be finished
    Resume(TournamentId),
    /// Fully created and announced
    Completed(TournamentId),
}

#[derive(Debug, Clone)]
pub struct RequestLedger {
    store: SharedStore,
    ttl: Duration,
}

impl RequestLedger {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Claim a request, or report how far an earlier delivery got
    pub async fn claim(&self, request_id: &str) -> Result<RequestClaim> {
        let key = request_key(request_id);
        let claim = self
            .store
            .atomic(|tx| {
                let fields = tx.hgetall(&key)?;
                let tournament_id = fields.get("tournamentId").and_then(|raw| parse_id(raw));

                let claim = match (fields.get("state").map(String::as_str), tournament_id) {
                    (None, _) => {
                        tx.hset(&key, "state", PENDING)?;
                        tx.expire(&key, self.ttl);
                        RequestClaim::New
                    }
                    (Some(CREATED), Some(id)) => RequestClaim::Completed(id),
                    (Some(_), Some(id)) => RequestClaim::Resume(id),
                    (Some(_), None) => RequestClaim::InFlight,
                };
                Ok(claim)
            })
            .await?;

        debug!("Request {} claim: {:?}", request_id, claim);
        Ok(claim)
    }

    /// Record the tournament persisted for a claimed request
    pub async fn bind(&self, request_id: &str, tournament_id: TournamentId) -> Result<()> {
        let key = request_key(request_id);
        self.store
            .atomic(|tx| {
                tx.hset(&key, "tournamentId", tournament_id.to_string())?;
                tx.expire(&key, self.ttl);
                Ok(())
            })
            .await
    }

    pub async fn complete(&self, request_id: &str) -> Result<()> {
        let key = request_key(request_id);
        self.store
            .atomic(|tx| {
                tx.hset(&key, "state", CREATED)?;
                tx.expire(&key, self.ttl);
                Ok(())
            })
            .await
    }

    /// Drop a claim whose attempt persisted nothing, so a redelivery starts over
    pub async fn release(&self, request_id: &str) -> Result<()> {
        let key = request_key(request_id);
        self.store
            .atomic(|tx| {
                tx.del(&key);
                Ok(())
            })
            .await
    }
}
