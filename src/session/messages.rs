//! Session wire messages
//!
//! Both directions use `{"event": "<kebab-name>", "data": {...}}`.

use crate::types::{
    MatchId, MatchStatus, PlayerId, PlayerProfile, PlayerState, RoomId, TournamentId,
    TournamentMode, TournamentSize,
};
use serde::{Deserialize, Serialize};

/// One roster line of a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: PlayerId,
    pub nickname: String,
    pub profile_image: String,
    pub state: PlayerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentRoster {
    pub tournament_id: TournamentId,
    pub mode: TournamentMode,
    pub size: TournamentSize,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReadyNotice {
    #[serde(rename_all = "camelCase")]
    UserReady { user_id: PlayerId },
    AllUsersReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultNotice {
    pub tournament_id: TournamentId,
    pub match_id: MatchId,
    pub round: u32,
    pub player1_score: u32,
    pub player2_score: u32,
    pub winner_id: PlayerId,
    pub loser_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatchView {
    pub match_id: MatchId,
    pub round: u32,
    pub player1_id: Option<PlayerId>,
    pub player2_id: Option<PlayerId>,
    pub winner_id: Option<PlayerId>,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSnapshot {
    pub tournament_id: TournamentId,
    pub current_round: u32,
    pub matches: Vec<BracketMatchView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedNotice {
    pub tournament_id: TournamentId,
    pub winner_id: Option<PlayerId>,
}

/// Directive to move from the waiting namespace to the tournament namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentCreatedNotice {
    pub tournament_id: TournamentId,
    pub mode: TournamentMode,
    pub size: TournamentSize,
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCreatedNotice {
    pub tournament_id: TournamentId,
    pub match_id: MatchId,
    pub match_server_name: String,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRoomUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_size: Option<TournamentSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<PlayerId>,
    pub users: Vec<PlayerProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCreated {
    pub room_id: RoomId,
    pub tournament_size: TournamentSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomInvitation {
    pub room_id: RoomId,
    pub host_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveSuccess {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: String,
    pub message: String,
}

/// Messages pushed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    MatchInfo(TournamentRoster),
    Ready(ReadyNotice),
    GameResult(GameResultNotice),
    Finished(FinishedNotice),
    WaitingRoomUpdate(WaitingRoomUpdate),
    BracketUpdated(BracketSnapshot),
    TournamentCreated(TournamentCreatedNotice),
    MatchCreated(MatchCreatedNotice),
    CustomCreate(CustomCreated),
    CustomInvite(CustomInvitation),
    LeaveSuccess(LeaveSuccess),
    Error(ErrorNotice),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::MatchInfo(_) => "match-info",
            ServerMessage::Ready(_) => "ready",
            ServerMessage::GameResult(_) => "game-result",
            ServerMessage::Finished(_) => "finished",
            ServerMessage::WaitingRoomUpdate(_) => "waiting-room-update",
            ServerMessage::BracketUpdated(_) => "bracket-updated",
            ServerMessage::TournamentCreated(_) => "tournament-created",
            ServerMessage::MatchCreated(_) => "match-created",
            ServerMessage::CustomCreate(_) => "custom-create",
            ServerMessage::CustomInvite(_) => "custom-invite",
            ServerMessage::LeaveSuccess(_) => "leave-success",
            ServerMessage::Error(_) => "error",
        }
    }

    /// Error message for a failed command
    pub fn error(error: &anyhow::Error) -> Self {
        ServerMessage::Error(ErrorNotice {
            kind: crate::error::classify(error).to_string(),
            message: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizePayload {
    pub tournament_size: TournamentSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub room_id: RoomId,
    pub user_id: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: RoomId,
}

/// Commands sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    AutoJoin(SizePayload),
    AutoLeave(SizePayload),
    CustomCreate(SizePayload),
    CustomInvite(InvitePayload),
    CustomAccept(RoomPayload),
    CustomStart(RoomPayload),
    CustomLeave,
    Ready,
}

impl ClientCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientCommand::AutoJoin(_) => "auto-join",
            ClientCommand::AutoLeave(_) => "auto-leave",
            ClientCommand::CustomCreate(_) => "custom-create",
            ClientCommand::CustomInvite(_) => "custom-invite",
            ClientCommand::CustomAccept(_) => "custom-accept",
            ClientCommand::CustomStart(_) => "custom-start",
            ClientCommand::CustomLeave => "custom-leave",
            ClientCommand::Ready => "ready",
        }
    }
}
