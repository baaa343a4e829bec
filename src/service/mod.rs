//! Service layer for the bracket-room tournament service
//!
//! Application state, component wiring, health checks and background task
//! management for the production service.

pub mod app;
pub mod health;

pub use app::{report_health, AppState, ServiceError};
pub use health::{HealthCheck, HealthSources, HealthStatus};
