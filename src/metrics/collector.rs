//! Metrics collection using Prometheus
//!
//! Metric groups for the tournament service: service health and event traffic,
//! tournament lifecycle, matchmaking (queues and custom rooms) and latencies.

use crate::amqp::handlers::Disposition;
use crate::types::{TournamentMode, TournamentSize};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the tournament service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    service_metrics: ServiceMetrics,

    tournament_metrics: TournamentMetrics,

    matchmaking_metrics: MatchmakingMetrics,

    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Inbound events by exchange and disposition
    pub events_processed_total: IntCounterVec,

    /// Outbound publishes by event and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Live transport sessions by namespace
    pub sessions_connected: IntGaugeVec,
}

/// Tournament lifecycle metrics
#[derive(Clone)]
pub struct TournamentMetrics {
    pub tournaments_created_total: IntCounterVec,

    pub tournaments_finished_total: IntCounterVec,

    /// Tournaments created and not yet finished
    pub active_tournaments: IntGauge,

    pub matches_requested_total: IntCounter,

    pub match_results_total: IntCounterVec,

    pub rounds_advanced_total: IntCounter,
}

/// Matchmaking metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Players currently queued per cohort size
    pub players_queued: IntGaugeVec,

    /// Completed cohorts by mode and size
    pub cohorts_formed_total: IntCounterVec,

    pub custom_rooms_created_total: IntCounter,

    /// Session commands by name and outcome
    pub commands_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Inbound event handling time
    pub event_processing_duration: HistogramVec,

    /// Session command handling time
    pub command_duration: HistogramVec,

    /// Bracket build plus persistence time
    pub tournament_setup_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let tournament_metrics = TournamentMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            tournament_metrics,
            matchmaking_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn tournament(&self) -> &TournamentMetrics {
        &self.tournament_metrics
    }

    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record one settled inbound delivery
    pub fn record_event_processed(
        &self,
        exchange: &str,
        disposition: Disposition,
        duration: Duration,
    ) {
        let disposition_str = match disposition {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
        };

        self.service_metrics
            .events_processed_total
            .with_label_values(&[exchange, disposition_str])
            .inc();

        self.performance_metrics
            .event_processing_duration
            .with_label_values(&[exchange])
            .observe(duration.as_secs_f64());
    }

    pub fn record_event_published(&self, event: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event, status])
            .inc();
    }

    pub fn record_tournament_created(
        &self,
        mode: TournamentMode,
        size: TournamentSize,
        setup: Duration,
    ) {
        self.tournament_metrics
            .tournaments_created_total
            .with_label_values(&[mode.as_str(), &size.players().to_string()])
            .inc();
        self.tournament_metrics.active_tournaments.inc();
        self.performance_metrics
            .tournament_setup_duration
            .observe(setup.as_secs_f64());
    }

    pub fn record_tournament_finished(&self, mode: TournamentMode) {
        self.tournament_metrics
            .tournaments_finished_total
            .with_label_values(&[mode.as_str()])
            .inc();
        self.tournament_metrics.active_tournaments.dec();
    }

    pub fn record_match_requested(&self) {
        self.tournament_metrics.matches_requested_total.inc();
    }

    /// `outcome` is "recorded" or "duplicate"
    pub fn record_match_result(&self, outcome: &str) {
        self.tournament_metrics
            .match_results_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_round_advanced(&self) {
        self.tournament_metrics.rounds_advanced_total.inc();
    }

    pub fn update_queue_length(&self, size: TournamentSize, length: usize) {
        self.matchmaking_metrics
            .players_queued
            .with_label_values(&[&size.players().to_string()])
            .set(length as i64);
    }

    pub fn record_cohort_formed(&self, mode: TournamentMode, size: TournamentSize) {
        self.matchmaking_metrics
            .cohorts_formed_total
            .with_label_values(&[mode.as_str(), &size.players().to_string()])
            .inc();
    }

    pub fn record_custom_room_created(&self) {
        self.matchmaking_metrics.custom_rooms_created_total.inc();
    }

    /// Record a session command and its handling time
    pub fn record_command(&self, command: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.matchmaking_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();

        self.performance_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn session_opened(&self, namespace: &str) {
        self.service_metrics
            .sessions_connected
            .with_label_values(&[namespace])
            .inc();
    }

    pub fn session_closed(&self, namespace: &str) {
        self.service_metrics
            .sessions_connected
            .with_label_values(&[namespace])
            .dec();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("bracket_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_processed_total = IntCounterVec::new(
            Opts::new(
                "bracket_room_events_processed_total",
                "Inbound events processed",
            ),
            &["exchange", "disposition"],
        )?;
        registry.register(Box::new(events_processed_total.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "bracket_room_events_published_total",
                "Outbound events published",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "bracket_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("bracket_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let sessions_connected = IntGaugeVec::new(
            Opts::new(
                "bracket_room_sessions_connected",
                "Connected transport sessions",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(sessions_connected.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_processed_total,
            events_published_total,
            health_status,
            component_health,
            sessions_connected,
        })
    }
}

impl TournamentMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tournaments_created_total = IntCounterVec::new(
            Opts::new(
                "bracket_room_tournaments_created_total",
                "Tournaments created",
            ),
            &["mode", "size"],
        )?;
        registry.register(Box::new(tournaments_created_total.clone()))?;

        let tournaments_finished_total = IntCounterVec::new(
            Opts::new(
                "bracket_room_tournaments_finished_total",
                "Tournaments finished",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(tournaments_finished_total.clone()))?;

        let active_tournaments = IntGauge::new(
            "bracket_room_active_tournaments",
            "Tournaments in progress",
        )?;
        registry.register(Box::new(active_tournaments.clone()))?;

        let matches_requested_total = IntCounter::new(
            "bracket_room_matches_requested_total",
            "Matches handed to match servers",
        )?;
        registry.register(Box::new(matches_requested_total.clone()))?;

        let match_results_total = IntCounterVec::new(
            Opts::new("bracket_room_match_results_total", "Match results received"),
            &["outcome"],
        )?;
        registry.register(Box::new(match_results_total.clone()))?;

        let rounds_advanced_total = IntCounter::new(
            "bracket_room_rounds_advanced_total",
            "Round pointer advances",
        )?;
        registry.register(Box::new(rounds_advanced_total.clone()))?;

        Ok(Self {
            tournaments_created_total,
            tournaments_finished_total,
            active_tournaments,
            matches_requested_total,
            match_results_total,
            rounds_advanced_total,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_queued = IntGaugeVec::new(
            Opts::new("bracket_room_players_queued", "Players waiting in queue"),
            &["size"],
        )?;
        registry.register(Box::new(players_queued.clone()))?;

        let cohorts_formed_total = IntCounterVec::new(
            Opts::new("bracket_room_cohorts_formed_total", "Completed cohorts"),
            &["mode", "size"],
        )?;
        registry.register(Box::new(cohorts_formed_total.clone()))?;

        let custom_rooms_created_total = IntCounter::new(
            "bracket_room_custom_rooms_created_total",
            "Custom rooms created",
        )?;
        registry.register(Box::new(custom_rooms_created_total.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("bracket_room_commands_total", "Session commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        Ok(Self {
            players_queued,
            cohorts_formed_total,
            custom_rooms_created_total,
            commands_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "bracket_room_event_processing_duration_seconds",
                "Inbound event processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["exchange"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "bracket_room_command_duration_seconds",
                "Session command handling time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let tournament_setup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "bracket_room_tournament_setup_duration_seconds",
                "Bracket build and persistence time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(tournament_setup_duration.clone()))?;

        Ok(Self {
            event_processing_duration,
            command_duration,
            tournament_setup_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _tournament = collector.tournament();
        let _matchmaking = collector.matchmaking();
        let _performance = collector.performance();
    }

    #[test]
    fn test_event_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_event_processed("match", Disposition::Ack, Duration::from_millis(3));
        collector.record_event_processed("match", Disposition::Requeue, Duration::from_millis(9));

        let processed = &collector.service().events_processed_total;
        assert_eq!(processed.with_label_values(&["match", "ack"]).get(), 1);
        assert_eq!(processed.with_label_values(&["match", "requeue"]).get(), 1);
    }

    #[test]
    fn test_tournament_lifecycle_gauge() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_tournament_created(
            TournamentMode::Auto,
            TournamentSize::Four,
            Duration::from_millis(2),
        );
        collector.record_tournament_created(
            TournamentMode::Custom,
            TournamentSize::Two,
            Duration::from_millis(2),
        );
        collector.record_tournament_finished(TournamentMode::Auto);

        assert_eq!(collector.tournament().active_tournaments.get(), 1);
        assert_eq!(
            collector
                .tournament()
                .tournaments_created_total
                .with_label_values(&["AUTO", "4"])
                .get(),
            1
        );
    }

    #[test]
    fn test_matchmaking_metrics() {
        let collector = MetricsCollector::new().unwrap();

        collector.update_queue_length(TournamentSize::Eight, 5);
        collector.record_command("auto-join", true, Duration::from_micros(300));
        collector.record_command("auto-join", false, Duration::from_micros(300));

        let matchmaking = collector.matchmaking();
        assert_eq!(matchmaking.players_queued.with_label_values(&["8"]).get(), 5);
        assert_eq!(
            matchmaking
                .commands_total
                .with_label_values(&["auto-join", "error"])
                .get(),
            1
        );
    }

    #[test]
    fn test_metrics_registry() {
        let collector = MetricsCollector::new().unwrap();
        collector.update_health_status(2);
        collector.update_component_health("store", true);

        let families = collector.registry().gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "bracket_room_health_status"));
    }
}
