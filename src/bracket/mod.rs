//! Bracket planning

pub mod builder;

pub use builder::{build_bracket, BracketPlan, PlannedMatch};
