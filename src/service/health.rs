//! Health checks and service statistics
//!
//! `HealthSources` is a cheap, cloneable view of the running components so the
//! health server and the periodic reporter can inspect them without owning
//! the application state.

use crate::amqp::connection::AmqpConnection;
use crate::matchmaking::MatchmakingHandlers;
use crate::session::hub::InMemorySessionHub;
use crate::store::SharedStore;
use crate::tournament::{OrchestratorStats, TournamentOrchestrator};
use crate::types::TournamentSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `bracket_room_health_status`
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Handles on the components a health check inspects
#[derive(Clone)]
pub struct HealthSources {
    pub service_name: String,
    pub is_running: Arc<RwLock<bool>>,
    pub started_at: Instant,
    pub store: SharedStore,
    pub hub: Arc<InMemorySessionHub>,
    pub orchestrator: TournamentOrchestrator,
    pub matchmaking: MatchmakingHandlers,
    /// Absent when running without a broker
    pub amqp: Option<Arc<AmqpConnection>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    pub tournaments: OrchestratorStats,
    /// Waiting players per cohort size
    pub players_queued: BTreeMap<u32, usize>,
    pub live_sessions: usize,
    pub stored_keys: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(sources: &HealthSources) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(sources).await,
            Self::check_store(sources).await,
            Self::check_orchestrator(sources).await,
            Self::check_amqp(sources),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: sources.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(sources).await,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(sources: &HealthSources) -> Result<HealthStatus> {
        if *sources.is_running.read().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(sources: &HealthSources) -> Result<HealthStatus> {
        if !*sources.is_running.read().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let store = Self::check_store(sources).await.status;
        let amqp = Self::check_amqp(sources).status;
        Ok(store.worst(amqp))
    }

    async fn check_service_running(sources: &HealthSources) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if *sources.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_store(sources: &HealthSources) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match sources.store.key_count().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Shared store check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_orchestrator(sources: &HealthSources) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match sources.orchestrator.get_stats().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Degraded,
                Some(format!("Stats check failed: {}", e)),
            ),
        };

        ComponentCheck {
            name: "orchestrator".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(sources: &HealthSources) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &sources.amqp {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without a broker".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(sources: &HealthSources) -> ServiceStats {
        let tournaments = sources.orchestrator.get_stats().await.unwrap_or_else(|e| {
            debug!("Failed to get orchestrator stats for health check: {}", e);
            OrchestratorStats::default()
        });

        let mut players_queued = BTreeMap::new();
        for size in TournamentSize::ALL {
            match sources.matchmaking.queue().len(size).await {
                Ok(len) => {
                    players_queued.insert(size.players(), len);
                }
                Err(e) => debug!("Failed to read queue {} for health check: {}", size, e),
            }
        }

        ServiceStats {
            tournaments,
            players_queued,
            live_sessions: sources.hub.session_count().await,
            stored_keys: sources.store.key_count().await.unwrap_or_default(),
            uptime_seconds: sources.started_at.elapsed().as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
