//! Common types used throughout the tournament service

use crate::error::TournamentError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = u64;

/// Unique identifier for tournaments
pub type TournamentId = u64;

/// Unique identifier for matches
pub type MatchId = u64;

/// Unique identifier for custom rooms
pub type RoomId = Uuid;

/// Transport session identifier
pub type SessionId = String;

/// Number of players in one single-elimination cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TournamentSize {
    Two,
    Four,
    Eight,
    Sixteen,
}

impl TournamentSize {
    /// Every supported cohort size, smallest first
    pub const ALL: [TournamentSize; 4] = [
        TournamentSize::Two,
        TournamentSize::Four,
        TournamentSize::Eight,
        TournamentSize::Sixteen,
    ];

    pub fn players(self) -> u32 {
        match self {
            TournamentSize::Two => 2,
            TournamentSize::Four => 4,
            TournamentSize::Eight => 8,
            TournamentSize::Sixteen => 16,
        }
    }

    /// Total number of matches in a bracket of this size
    pub fn match_count(self) -> usize {
        self.players() as usize - 1
    }
}

impl TryFrom<u32> for TournamentSize {
    type Error = TournamentError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(TournamentSize::Two),
            4 => Ok(TournamentSize::Four),
            8 => Ok(TournamentSize::Eight),
            16 => Ok(TournamentSize::Sixteen),
            other => Err(TournamentError::invalid(format!(
                "tournament size must be 2, 4, 8 or 16, got {}",
                other
            ))),
        }
    }
}

impl From<TournamentSize> for u32 {
    fn from(size: TournamentSize) -> Self {
        size.players()
    }
}

impl std::fmt::Display for TournamentSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.players())
    }
}

/// How a tournament cohort was assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TournamentMode {
    Auto,
    Custom,
}

impl TournamentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentMode::Auto => "AUTO",
            TournamentMode::Custom => "CUSTOM",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AUTO" => Some(TournamentMode::Auto),
            "CUSTOM" => Some(TournamentMode::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for TournamentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall tournament status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TournamentStatus {
    InProgress,
    Finished,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::InProgress => "IN_PROGRESS",
            TournamentStatus::Finished => "FINISHED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(TournamentStatus::InProgress),
            "FINISHED" => Some(TournamentStatus::Finished),
            _ => None,
        }
    }
}

/// Lifecycle flag of one player inside one tournament
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlayerState {
    Nothing,
    Ready,
    Playing,
    Eliminated,
}

/// Status of a single bracket match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    InProgress,
    Finished,
}

/// Which of the two player slots of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchSlot {
    First,
    Second,
}

/// Public profile of a player as returned by the profile service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub nickname: String,
    pub avatar_url: String,
}

impl PlayerProfile {
    pub const PLACEHOLDER_NICKNAME: &'static str = "???";
    pub const PLACEHOLDER_AVATAR: &'static str = "https://null.com/null.png";

    /// Profile used when a lookup fails or another player must stay anonymous
    pub fn placeholder(id: PlayerId) -> Self {
        Self {
            id,
            nickname: Self::PLACEHOLDER_NICKNAME.to_string(),
            avatar_url: Self::PLACEHOLDER_AVATAR.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.nickname == Self::PLACEHOLDER_NICKNAME && self.avatar_url == Self::PLACEHOLDER_AVATAR
    }
}

/// Final scores reported for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScore {
    pub player1: u32,
    pub player2: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tournament_size_conversion() {
        assert_eq!(TournamentSize::try_from(8).unwrap(), TournamentSize::Eight);
        assert!(TournamentSize::try_from(6).is_err());
        assert_eq!(u32::from(TournamentSize::Sixteen), 16);
        assert_eq!(TournamentSize::Four.match_count(), 3);
    }

    #[test]
    fn test_tournament_size_serde() {
        let size: TournamentSize = serde_json::from_str("4").unwrap();
        assert_eq!(size, TournamentSize::Four);
        assert!(serde_json::from_str::<TournamentSize>("3").is_err());
        assert_eq!(serde_json::to_string(&TournamentSize::Two).unwrap(), "2");
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&TournamentMode::Custom).unwrap(),
            "\"CUSTOM\""
        );
        assert_eq!(
            serde_json::to_string(&TournamentStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::to_string(&PlayerState::Eliminated).unwrap(),
            "\"ELIMINATED\""
        );
        assert_eq!(
            serde_json::to_string(&MatchStatus::NotStarted).unwrap(),
            "\"NOT_STARTED\""
        );
    }

    #[test]
    fn test_placeholder_profile() {
        let profile = PlayerProfile::placeholder(7);
        assert_eq!(profile.id, 7);
        assert!(profile.is_placeholder());
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["avatarUrl"], "https://null.com/null.png");
    }
}
