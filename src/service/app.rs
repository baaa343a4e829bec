//! Main application state and service coordination
//!
//! AppState owns the shared store, the session hub, the orchestrator and the
//! matchmaking handlers, and runs the gateway, the health server, the event
//! consumer and the maintenance tasks around them.

use crate::amqp::connection::AmqpConnection;
use crate::amqp::handlers::{declare_topology, EventConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher};
use crate::config::AppConfig;
use crate::matchmaking::MatchmakingHandlers;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::persistence::InMemoryTournamentRepository;
use crate::profile::{HttpProfileClient, ProfileDirectory, ProfileService};
use crate::service::health::{HealthCheck, HealthSources};
use crate::session::gateway::{router, GatewayState};
use crate::session::hub::InMemorySessionHub;
use crate::session::notifier::SessionNotifier;
use crate::store::{ProfileCache, QueueStore, RoomStore, SessionStore, SharedStore};
use crate::tournament::{TournamentOrchestrator, TournamentStores};
use crate::types::TournamentSize;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    store: SharedStore,
    sessions: SessionStore,
    hub: Arc<InMemorySessionHub>,
    orchestrator: TournamentOrchestrator,
    matchmaking: MatchmakingHandlers,

    /// Absent when the service was assembled without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,
    event_consumer: Option<EventConsumer>,

    metrics_service: Arc<MetricsService>,
    background_tasks: Vec<JoinHandle<()>>,
    gateway_shutdown: broadcast::Sender<()>,

    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Connect to the broker and the profile service and assemble the service
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing bracket-room tournament service");
        info!(
            "Configuration: service={}, amqp_url={}, profile_service={}",
            config.service.name, config.amqp.url, config.profile.base_url
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel =
            amqp_connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open publisher channel: {}", e),
                })?;
        let event_publisher: Arc<dyn EventPublisher> = Arc::new(
            AmqpEventPublisher::new(channel, config.publisher_config())
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        let profile_service: Arc<dyn ProfileService> = Arc::new(
            HttpProfileClient::new(&config.profile.base_url, config.profile_timeout()).map_err(
                |e| ServiceError::Initialization {
                    message: format!("Failed to create profile client: {}", e),
                },
            )?,
        );

        Self::assemble(config, event_publisher, profile_service, Some(amqp_connection)).await
    }

    /// Assemble the service around the given collaborators, without a broker.
    /// Inbound events must then be fed to [`AppState::orchestrator`] directly.
    pub async fn with_components(
        config: AppConfig,
        event_publisher: Arc<dyn EventPublisher>,
        profile_service: Arc<dyn ProfileService>,
    ) -> Result<Self, ServiceError> {
        Self::assemble(config, event_publisher, profile_service, None).await
    }

    async fn assemble(
        config: AppConfig,
        event_publisher: Arc<dyn EventPublisher>,
        profile_service: Arc<dyn ProfileService>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = SharedStore::new();
        let sessions = SessionStore::new(store.clone(), config.session_ttl());
        let hub = Arc::new(InMemorySessionHub::new());
        let notifier = SessionNotifier::new(sessions.clone(), hub.clone());
        let profiles = ProfileDirectory::new(
            profile_service,
            ProfileCache::new(store.clone(), config.profile_ttl()),
        );

        let stores = TournamentStores::new(store.clone(), config.tournament_ttl());
        for server in &config.store.match_servers {
            stores
                .match_servers
                .register(server)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to register match server {}: {}", server, e),
                })?;
        }
        info!(
            "Registered {} match servers: {:?}",
            config.store.match_servers.len(),
            config.store.match_servers
        );

        let orchestrator = TournamentOrchestrator::with_metrics(
            Arc::new(InMemoryTournamentRepository::new()),
            stores,
            profiles.clone(),
            event_publisher.clone(),
            notifier.clone(),
            metrics_collector.clone(),
        );
        let matchmaking = MatchmakingHandlers::with_metrics(
            QueueStore::new(store.clone()),
            RoomStore::new(store.clone(), config.room_ttl()),
            profiles,
            event_publisher,
            notifier,
            metrics_collector.clone(),
        );

        let is_running = Arc::new(RwLock::new(false));
        let started_at = Instant::now();
        let sources = HealthSources {
            service_name: config.service.name.clone(),
            is_running: is_running.clone(),
            started_at,
            store: store.clone(),
            hub: hub.clone(),
            orchestrator: orchestrator.clone(),
            matchmaking: matchmaking.clone(),
            amqp: amqp_connection.clone(),
        };
        let metrics_service = Self::initialize_metrics(&config, metrics_collector, sources);

        let (gateway_shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            sessions,
            hub,
            orchestrator,
            matchmaking,
            amqp_connection,
            event_consumer: None,
            metrics_service,
            background_tasks: Vec::new(),
            gateway_shutdown,
            is_running,
            started_at,
        })
    }

    /// Start all background services and event consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting bracket-room tournament service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_gateway().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("Bracket-room tournament service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of bracket-room service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.event_consumer.take() {
            match consumer.stop_consuming().await {
                Ok(()) => info!("AMQP event consumption stopped"),
                Err(e) => warn!("Failed to stop AMQP consumer: {}", e),
            }
        }

        if self.gateway_shutdown.send(()).is_err() {
            debug!("Gateway was not running");
        }

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        if let Some(connection) = self.amqp_connection.take() {
            match Arc::try_unwrap(connection) {
                Ok(connection) => {
                    if let Err(e) = connection.close().await {
                        warn!("Failed to close AMQP connection: {}", e);
                    }
                }
                Err(_) => debug!("AMQP connection still shared, dropping handle"),
            }
        }

        let final_stats =
            self.orchestrator
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("Bracket-room service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &TournamentOrchestrator {
        &self.orchestrator
    }

    pub fn matchmaking(&self) -> &MatchmakingHandlers {
        &self.matchmaking
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// State shared by every websocket connection
    pub fn gateway_state(&self) -> GatewayState {
        GatewayState {
            hub: self.hub.clone(),
            sessions: self.sessions.clone(),
            matchmaking: self.matchmaking.clone(),
            orchestrator: self.orchestrator.clone(),
            metrics_collector: self.metrics_service.collector(),
        }
    }

    pub fn sources(&self) -> HealthSources {
        HealthSources {
            service_name: self.config.service.name.clone(),
            is_running: self.is_running.clone(),
            started_at: self.started_at,
            store: self.store.clone(),
            hub: self.hub.clone(),
            orchestrator: self.orchestrator.clone(),
            matchmaking: self.matchmaking.clone(),
            amqp: self.amqp_connection.clone(),
        }
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        sources: HealthSources,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.metrics_port
        );

        let health_config = HealthServerConfig {
            port: config.service.metrics_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_sources(sources),
        );

        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            config
                .amqp_connection_config()
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Failed to parse AMQP URL: {}", e),
                })?;

        let connect = AmqpConnection::new(amqp_config);
        let connection = tokio::time::timeout(config.amqp_connection_timeout(), connect)
            .await
            .map_err(|_| ServiceError::AmqpConnection {
                message: format!(
                    "Timed out after {:?} connecting to AMQP",
                    config.amqp_connection_timeout()
                ),
            })?
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;

        Ok(Arc::new(connection))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.metrics_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("Metrics service started on port {}", port);
        Ok(())
    }

    /// Bind the websocket gateway and serve it in the background
    async fn start_gateway(&mut self) -> Result<(), ServiceError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.service.http_port));
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to bind gateway to {}: {}", addr, e),
                })?;

        let app = router(self.gateway_state());
        let mut shutdown_rx = self.gateway_shutdown.subscribe();

        let gateway_handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("Gateway shutdown signal received");
                })
                .await;

            match served {
                Ok(()) => info!("Gateway stopped"),
                Err(e) => error!("Gateway failed: {}", e),
            }
        });
        self.background_tasks.push(gateway_handle);

        info!("Websocket gateway listening on ws://{}", addr);
        Ok(())
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            warn!("No AMQP connection, inbound events will not be consumed");
            return Ok(());
        };

        let queue_name = self.config.amqp.queue_name.clone();
        info!("Starting AMQP event consumption on '{}'", queue_name);

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        declare_topology(&channel, &queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let consumer = EventConsumer::new(
            Arc::new(self.orchestrator.clone()),
            Some(self.metrics_service.collector()),
            channel,
        );
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming events: {}", e),
            })?;

        self.event_consumer = Some(consumer);
        info!("AMQP event consumption started on queue '{}'", queue_name);
        Ok(())
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        info!(
            "Starting store purge task ({}s interval)",
            self.config.purge_interval().as_secs()
        );
        let purge_task = {
            let store = self.store.clone();
            let purge_interval = self.config.purge_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(purge_interval);

                while *is_running.read().await {
                    interval.tick().await;

                    match store.purge_expired().await {
                        Ok(0) => debug!("Purge check completed, nothing expired"),
                        Ok(purged) => info!("Purged {} expired keys", purged),
                        Err(e) => warn!("Store purge failed: {}", e),
                    }
                }

                info!("Store purge task stopped");
            })
        };

        info!(
            "Starting health report task ({}s interval)",
            self.config.health_check_interval().as_secs()
        );
        let health_task = {
            let sources = self.sources();
            let metrics_collector = self.metrics_service.collector();
            let health_interval = self.config.health_check_interval();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(health_interval);

                while *sources.is_running.read().await {
                    interval.tick().await;
                    report_health(&sources, &metrics_collector).await;
                }

                info!("Health report task stopped");
            })
        };

        self.background_tasks.push(purge_task);
        self.background_tasks.push(health_task);
        info!("Background maintenance tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("All {} background tasks stopped", task_count);
    }
}

/// Run one health check and mirror it into the gauges
pub async fn report_health(sources: &HealthSources, metrics_collector: &MetricsCollector) {
    metrics_collector.update_uptime(sources.started_at.elapsed());

    match HealthCheck::check(sources).await {
        Ok(health) => {
            metrics_collector.update_health_status(health.status.as_gauge());
            for check in &health.checks {
                metrics_collector.update_component_health(
                    &check.name,
                    check.status != crate::service::health::HealthStatus::Unhealthy,
                );
            }
            for size in TournamentSize::ALL {
                if let Some(len) = health.stats.players_queued.get(&size.players()) {
                    metrics_collector.update_queue_length(size, *len);
                }
            }

            info!(
                "Health check: {} - {} tournaments created, {} finished, {} live sessions",
                health.status,
                health.stats.tournaments.tournaments_created,
                health.stats.tournaments.tournaments_finished,
                health.stats.live_sessions
            );
        }
        Err(e) => warn!("Health check failed: {}", e),
    }
}
