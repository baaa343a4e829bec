//! Tournament lifecycle: bracket creation, readiness, results and advancement

pub mod orchestrator;

pub use orchestrator::{OrchestratorStats, TournamentOrchestrator, TournamentStores};
