//! Single-elimination bracket construction
//!
//! The tree is built top-down from the final (round 2) with an explicit work stack,
//! so depth never touches the call stack. Children are pushed second-slot first,
//! which makes leaves come off the stack left to right and lets them take
//! consecutive player pairs.

use crate::error::{Result, TournamentError};
use crate::types::{MatchSlot, PlayerId, TournamentSize};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One match of a planned bracket, addressed by its index in [`BracketPlan::matches`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMatch {
    pub index: usize,
    /// Players remaining when this match is played
    pub round: u32,
    pub player1: Option<PlayerId>,
    pub player2: Option<PlayerId>,
    /// Parent match and the slot the winner takes there
    pub feeds: Option<(usize, MatchSlot)>,
    /// Child matches, first slot first
    pub previous: Vec<usize>,
}

impl PlannedMatch {
    pub fn is_leaf(&self) -> bool {
        self.previous.is_empty()
    }
}

/// A complete bracket ready to be persisted. Index 0 is the final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPlan {
    pub size: TournamentSize,
    pub matches: Vec<PlannedMatch>,
}

impl BracketPlan {
    pub fn final_match(&self) -> &PlannedMatch {
        &self.matches[0]
    }

    pub fn leaves(&self) -> impl Iterator<Item = &PlannedMatch> {
        self.matches.iter().filter(|m| m.is_leaf())
    }

    pub fn matches_in_round(&self, round: u32) -> impl Iterator<Item = &PlannedMatch> {
        self.matches.iter().filter(move |m| m.round == round)
    }

    /// Round numbers in play order: N, N/2, ..., 2
    pub fn rounds(&self) -> Vec<u32> {
        let mut rounds = Vec::new();
        let mut round = self.size.players();
        while round >= 2 {
            rounds.push(round);
            round /= 2;
        }
        rounds
    }
}

struct Pending {
    round: u32,
    parent: Option<(usize, MatchSlot)>,
}

/// Build the bracket for `players`, pairing `players[2i]` with `players[2i + 1]`
/// in the i-th leaf from the left.
pub fn build_bracket(size: TournamentSize, players: &[PlayerId]) -> Result<BracketPlan> {
    let n = size.players();
    if players.len() != n as usize {
        return Err(TournamentError::invalid(format!(
            "bracket of size {} needs {} players, got {}",
            size,
            n,
            players.len()
        ))
        .into());
    }

    let mut seen = HashSet::with_capacity(players.len());
    if let Some(duplicate) = players.iter().find(|id| !seen.insert(**id)) {
        return Err(
            TournamentError::invalid(format!("player {} appears twice", duplicate)).into(),
        );
    }

    let mut matches: Vec<PlannedMatch> = Vec::with_capacity(size.match_count());
    let mut pairs = players.chunks_exact(2);
    let mut stack = vec![Pending {
        round: 2,
        parent: None,
    }];

    while let Some(Pending { round, parent }) = stack.pop() {
        let index = matches.len();
        let (player1, player2) = if round == n {
            match pairs.next() {
                Some([first, second]) => (Some(*first), Some(*second)),
                _ => {
                    return Err(TournamentError::InternalError {
                        message: format!("ran out of player pairs at leaf {}", index),
                    }
                    .into())
                }
            }
        } else {
            (None, None)
        };

        if let Some((parent_index, _)) = parent {
            matches[parent_index].previous.push(index);
        }

        matches.push(PlannedMatch {
            index,
            round,
            player1,
            player2,
            feeds: parent,
            previous: Vec::with_capacity(2),
        });

        if round < n {
            let child_round = round * 2;
            stack.push(Pending {
                round: child_round,
                parent: Some((index, MatchSlot::Second)),
            });
            stack.push(Pending {
                round: child_round,
                parent: Some((index, MatchSlot::First)),
            });
        }
    }

    Ok(BracketPlan { size, matches })
}
