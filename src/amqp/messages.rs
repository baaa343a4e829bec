//! Event log message definitions and serialization
//!
//! Bodies are flat JSON objects carrying an `eventType` discriminator plus
//! camelCase fields. Inbound payloads are decoded into typed events and validated
//! before anything acts on them.

use crate::error::{Result, TournamentError};
use crate::types::{MatchId, PlayerId, TournamentId, TournamentMode, TournamentSize};
use crate::utils::{current_timestamp, generate_correlation_id, generate_request_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Topic exchanges
pub const TOURNAMENT_EXCHANGE: &str = "tournament";
pub const MATCH_EXCHANGE: &str = "match";

/// Default durable queue this service consumes from
pub const DEFAULT_CONSUMER_QUEUE: &str = "tournament-service.events";

/// Routing keys
pub const TOURNAMENT_REQUEST_ROUTING_KEY: &str = "tournament.request";
pub const TOURNAMENT_CREATED_ROUTING_KEY: &str = "tournament.created";
pub const MATCH_REQUEST_ROUTING_KEY: &str = "match.request";
pub const MATCH_CREATED_ROUTING_KEY: &str = "match.created";
pub const MATCH_RESULT_ROUTING_KEY: &str = "match.result";

/// Bindings of the consumer queue: (exchange, routing key)
pub const CONSUMED_BINDINGS: [(&str, &str); 4] = [
    (TOURNAMENT_EXCHANGE, TOURNAMENT_REQUEST_ROUTING_KEY),
    (TOURNAMENT_EXCHANGE, TOURNAMENT_CREATED_ROUTING_KEY),
    (MATCH_EXCHANGE, MATCH_CREATED_ROUTING_KEY),
    (MATCH_EXCHANGE, MATCH_RESULT_ROUTING_KEY),
];

/// A completed cohort asking for a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentRequested {
    /// Deduplicates redeliveries; producers that omit it get a fresh one
    #[serde(default = "generate_request_id")]
    pub request_id: String,
    pub players: Vec<PlayerId>,
    pub mode: TournamentMode,
    pub size: TournamentSize,
    #[serde(default = "current_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A tournament was persisted and initialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentCreated {
    pub tournament_id: TournamentId,
    pub players: Vec<PlayerId>,
    pub mode: TournamentMode,
    pub size: TournamentSize,
    #[serde(default = "current_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Ask the game side to host a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequested {
    pub tournament_id: TournamentId,
    pub match_id: MatchId,
    pub match_server_name: String,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    #[serde(default = "current_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A match server accepted a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCreated {
    pub tournament_id: TournamentId,
    pub match_id: MatchId,
    pub match_server_name: String,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    #[serde(default = "current_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Final outcome of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub tournament_id: TournamentId,
    pub match_id: MatchId,
    pub player1_score: u32,
    pub player2_score: u32,
    pub winner_id: PlayerId,
    pub loser_id: PlayerId,
    #[serde(default = "current_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Messages on the `tournament` exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum TournamentTopicMessage {
    #[serde(rename = "REQUEST")]
    Request(TournamentRequested),
    #[serde(rename = "CREATED")]
    Created(TournamentCreated),
}

/// Messages on the `match` exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum MatchTopicMessage {
    #[serde(rename = "REQUEST")]
    Request(MatchRequested),
    #[serde(rename = "CREATED")]
    Created(MatchCreated),
    #[serde(rename = "RESULT")]
    Result(MatchResult),
}

/// Inbound events this service reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    TournamentRequested(TournamentRequested),
    TournamentCreated(TournamentCreated),
    MatchCreated(MatchCreated),
    MatchResult(MatchResult),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TournamentRequested(_) => "TournamentRequested",
            DomainEvent::TournamentCreated(_) => "TournamentCreated",
            DomainEvent::MatchCreated(_) => "MatchCreated",
            DomainEvent::MatchResult(_) => "MatchResult",
        }
    }

    /// Reject payloads that are well-formed JSON but semantically invalid
    pub fn validate(&self) -> Result<()> {
        match self {
            DomainEvent::TournamentRequested(event) => {
                if event.request_id.trim().is_empty() {
                    return Err(
                        TournamentError::invalid("tournament request has no request id").into(),
                    );
                }
                validate_roster(&event.players, event.size)
            }
            DomainEvent::TournamentCreated(event) => validate_roster(&event.players, event.size),
            DomainEvent::MatchCreated(event) => {
                if event.player1_id == event.player2_id {
                    return Err(TournamentError::invalid(format!(
                        "match {} pairs player {} with itself",
                        event.match_id, event.player1_id
                    ))
                    .into());
                }
                if event.match_server_name.trim().is_empty() {
                    return Err(TournamentError::invalid(format!(
                        "match {} has no match server",
                        event.match_id
                    ))
                    .into());
                }
                Ok(())
            }
            DomainEvent::MatchResult(event) => {
                if event.winner_id == event.loser_id {
                    return Err(TournamentError::invalid(format!(
                        "match {} reports player {} as both winner and loser",
                        event.match_id, event.winner_id
                    ))
                    .into());
                }
                Ok(())
            }
        }
    }
}

fn validate_roster(players: &[PlayerId], size: TournamentSize) -> Result<()> {
    if players.len() != size.players() as usize {
        return Err(TournamentError::invalid(format!(
            "size {} tournament carries {} players",
            size,
            players.len()
        ))
        .into());
    }
    let unique: HashSet<_> = players.iter().collect();
    if unique.len() != players.len() {
        return Err(TournamentError::invalid("roster contains duplicate players").into());
    }
    Ok(())
}

/// Decode and validate one delivery.
///
/// Returns `Ok(None)` for well-formed events this service does not consume
/// (its own `match.request`).
pub fn decode_event(exchange: &str, body: &[u8]) -> Result<Option<DomainEvent>> {
    let event = match exchange {
        TOURNAMENT_EXCHANGE => {
            let message: TournamentTopicMessage = serde_json::from_slice(body).map_err(|e| {
                TournamentError::invalid(format!("unreadable tournament message: {}", e))
            })?;
            match message {
                TournamentTopicMessage::Request(event) => DomainEvent::TournamentRequested(event),
                TournamentTopicMessage::Created(event) => DomainEvent::TournamentCreated(event),
            }
        }
        MATCH_EXCHANGE => {
            let message: MatchTopicMessage = serde_json::from_slice(body).map_err(|e| {
                TournamentError::invalid(format!("unreadable match message: {}", e))
            })?;
            match message {
                MatchTopicMessage::Request(_) => return Ok(None),
                MatchTopicMessage::Created(event) => DomainEvent::MatchCreated(event),
                MatchTopicMessage::Result(event) => DomainEvent::MatchResult(event),
            }
        }
        other => {
            return Err(TournamentError::invalid(format!("unexpected exchange '{}'", other)).into())
        }
    };

    event.validate()?;
    Ok(Some(event))
}

/// A serialized message ready to publish
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: &'static str,
    pub routing_key: &'static str,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    fn encode<T: Serialize>(
        exchange: &'static str,
        routing_key: &'static str,
        message: &T,
    ) -> Result<Self> {
        let body = serde_json::to_vec(message).map_err(|e| TournamentError::InternalError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        Ok(Self {
            exchange,
            routing_key,
            correlation_id: generate_correlation_id(),
            timestamp: current_timestamp(),
            body,
        })
    }

    pub fn tournament(message: &TournamentTopicMessage) -> Result<Self> {
        let routing_key = match message {
            TournamentTopicMessage::Request(_) => TOURNAMENT_REQUEST_ROUTING_KEY,
            TournamentTopicMessage::Created(_) => TOURNAMENT_CREATED_ROUTING_KEY,
        };
        Self::encode(TOURNAMENT_EXCHANGE, routing_key, message)
    }

    pub fn match_topic(message: &MatchTopicMessage) -> Result<Self> {
        let routing_key = match message {
            MatchTopicMessage::Request(_) => MATCH_REQUEST_ROUTING_KEY,
            MatchTopicMessage::Created(_) => MATCH_CREATED_ROUTING_KEY,
            MatchTopicMessage::Result(_) => MATCH_RESULT_ROUTING_KEY,
        };
        Self::encode(MATCH_EXCHANGE, routing_key, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};

    #[test]
    fn test_tournament_request_wire_format() {
        let message = TournamentTopicMessage::Request(TournamentRequested {
            request_id: "req-1".to_string(),
            players: vec![1, 2],
            mode: TournamentMode::Auto,
            size: TournamentSize::Two,
            timestamp: current_timestamp(),
        });
        let outbound = OutboundMessage::tournament(&message).unwrap();
        assert_eq!(outbound.routing_key, TOURNAMENT_REQUEST_ROUTING_KEY);

        let json: serde_json::Value = serde_json::from_slice(&outbound.body).unwrap();
        assert_eq!(json["eventType"], "REQUEST");
        assert_eq!(json["mode"], "AUTO");
        assert_eq!(json["size"], 2);
        assert_eq!(json["players"], serde_json::json!([1, 2]));
        assert_eq!(json["requestId"], "req-1");
    }

    #[test]
    fn test_decode_match_result() {
        let body = br#"{"eventType":"RESULT","tournamentId":4,"matchId":9,"player1Score":3,"player2Score":1,"winnerId":10,"loserId":11}"#;
        let event = decode_event(MATCH_EXCHANGE, body).unwrap().unwrap();
        match event {
            DomainEvent::MatchResult(result) => {
                assert_eq!(result.match_id, 9);
                assert_eq!(result.winner_id, 10);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_own_match_request_is_skipped() {
        let body = br#"{"eventType":"REQUEST","tournamentId":4,"matchId":9,"matchServerName":"alpha","player1Id":1,"player2Id":2}"#;
        assert!(decode_event(MATCH_EXCHANGE, body).unwrap().is_none());
    }

    #[test]
    fn test_invalid_payloads_are_validation_errors() {
        let cases: [(&str, &[u8]); 4] = [
            (TOURNAMENT_EXCHANGE, br#"{"eventType":"REQUEST","players":[1,2,3],"mode":"AUTO","size":4}"#),
            (TOURNAMENT_EXCHANGE, br#"{"eventType":"REQUEST","players":[1,1],"mode":"AUTO","size":2}"#),
            (TOURNAMENT_EXCHANGE, br#"{"eventType":"REQUEST","players":[1,2],"mode":"AUTO","size":3}"#),
            (MATCH_EXCHANGE, br#"{"eventType":"RESULT","tournamentId":1,"matchId":1,"player1Score":1,"player2Score":0,"winnerId":5,"loserId":5}"#),
        ];

        for (exchange, body) in cases {
            let err = decode_event(exchange, body).unwrap_err();
            assert_eq!(classify(&err), ErrorKind::Validation);
        }
    }

    #[test]
    fn test_unknown_exchange() {
        assert!(decode_event("chat", b"{}").is_err());
    }
}
