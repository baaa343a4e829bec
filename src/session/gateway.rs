//! Websocket gateway for the `waiting` and `tournament` namespaces
//!
//! Each connection gets a session id, a hub channel and a binding in the session
//! store. Client commands are dispatched to the matchmaking handlers or the
//! orchestrator; a failed command becomes an `error` message on the same session.

use crate::error::{Result, TournamentError};
use crate::matchmaking::MatchmakingHandlers;
use crate::metrics::MetricsCollector;
use crate::session::hub::{InMemorySessionHub, SessionHub};
use crate::session::messages::{ClientCommand, ServerMessage};
use crate::session::notifier::tournament_room;
use crate::store::{Namespace, SessionStore};
use crate::tournament::TournamentOrchestrator;
use crate::types::{PlayerId, TournamentId};
use crate::utils::{generate_session_id, parse_id};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Header carrying the authenticated player id
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct GatewayState {
    pub hub: Arc<InMemorySessionHub>,
    pub sessions: SessionStore,
    pub matchmaking: MatchmakingHandlers,
    pub orchestrator: TournamentOrchestrator,
    pub metrics_collector: Arc<MetricsCollector>,
}

/// Where a connection lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Waiting,
    Tournament(TournamentId),
}

impl Endpoint {
    pub fn namespace(&self) -> Namespace {
        match self {
            Endpoint::Waiting => Namespace::Waiting,
            Endpoint::Tournament(_) => Namespace::Tournament,
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/waiting", get(waiting_handler))
        .route("/ws/tournament/{tournament_id}", get(tournament_handler))
        .with_state(state)
}

fn player_from_headers(headers: &HeaderMap) -> Option<PlayerId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| parse_id(raw.trim()))
}

async fn waiting_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    let Some(player_id) = player_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing or invalid x-user-id").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, Endpoint::Waiting, player_id, state))
}

async fn tournament_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Path(tournament_id): Path<TournamentId>,
    State(state): State<GatewayState>,
) -> Response {
    let Some(player_id) = player_from_headers(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing or invalid x-user-id").into_response();
    };

    match state
        .orchestrator
        .is_participant(tournament_id, player_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                "Player {} tried to join tournament {} without a seat",
                player_id, tournament_id
            );
            return (StatusCode::FORBIDDEN, "Not a participant").into_response();
        }
        Err(e) => {
            error!("Participant check failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response();
        }
    }

    ws.on_upgrade(move |socket| {
        handle_socket(socket, Endpoint::Tournament(tournament_id), player_id, state)
    })
}

async fn handle_socket(
    socket: WebSocket,
    endpoint: Endpoint,
    player_id: PlayerId,
    state: GatewayState,
) {
    let namespace = endpoint.namespace();
    let session_id = generate_session_id();
    let (mut sender, mut receiver) = socket.split();

    let mut outbound = state.hub.register(&session_id).await;
    if let Err(e) = open_session(&state, endpoint, player_id, &session_id).await {
        error!(
            "Failed to open {} session for player {}: {}",
            namespace, player_id, e
        );
        state.hub.unregister(&session_id).await;
        return;
    }
    state.metrics_collector.session_opened(namespace.as_str());
    info!(
        "Session {} connected: namespace={}, player={}",
        session_id, namespace, player_id
    );

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {}: {}", message.event_name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let outcome = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => dispatch(&state, endpoint, player_id, command).await,
                    Err(e) => {
                        Err(TournamentError::invalid(format!("unreadable command: {}", e)).into())
                    }
                };
                if let Err(e) = outcome {
                    warn!("Command from player {} failed: {}", player_id, e);
                    if let Err(send_error) = state
                        .hub
                        .send_to(&session_id, &ServerMessage::error(&e))
                        .await
                    {
                        error!("Failed to report error to {}: {}", session_id, send_error);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("Session {} transport error: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    if let Err(e) = close_session(&state, endpoint, player_id, &session_id).await {
        warn!("Cleanup of session {} failed: {}", session_id, e);
    }
    state.metrics_collector.session_closed(namespace.as_str());
    info!(
        "Session {} disconnected: namespace={}, player={}",
        session_id, namespace, player_id
    );
}

/// Bind a freshly registered session and run the namespace's connect hook
pub async fn open_session(
    state: &GatewayState,
    endpoint: Endpoint,
    player_id: PlayerId,
    session_id: &str,
) -> Result<()> {
    state
        .sessions
        .bind(endpoint.namespace(), player_id, session_id)
        .await?;

    if let Endpoint::Tournament(tournament_id) = endpoint {
        state
            .hub
            .join_room(session_id, &tournament_room(tournament_id))
            .await?;
        state
            .orchestrator
            .send_tournament_info(tournament_id, player_id)
            .await?;
    }
    Ok(())
}

/// Release a session. Waiting-namespace state is cleaned up only when this
/// session is still the player's current one.
pub async fn close_session(
    state: &GatewayState,
    endpoint: Endpoint,
    player_id: PlayerId,
    session_id: &str,
) -> Result<()> {
    let namespace = endpoint.namespace();
    let current = state.sessions.unbind(namespace, player_id, session_id).await?;
    state.hub.unregister(session_id).await;

    if current && endpoint == Endpoint::Waiting {
        state.matchmaking.disconnected(player_id).await?;
    }
    Ok(())
}

/// Route one command to its handler
pub async fn dispatch(
    state: &GatewayState,
    endpoint: Endpoint,
    player_id: PlayerId,
    command: ClientCommand,
) -> Result<()> {
    let started = Instant::now();
    let name = command.event_name();
    let matchmaking = &state.matchmaking;

    let outcome = match (endpoint, command) {
        (Endpoint::Waiting, ClientCommand::AutoJoin(payload)) => {
            matchmaking
                .auto_join(player_id, payload.tournament_size)
                .await
        }
        (Endpoint::Waiting, ClientCommand::AutoLeave(payload)) => {
            matchmaking
                .auto_leave(player_id, payload.tournament_size)
                .await
        }
        (Endpoint::Waiting, ClientCommand::CustomCreate(payload)) => matchmaking
            .custom_create(player_id, payload.tournament_size)
            .await
            .map(|_| ()),
        (Endpoint::Waiting, ClientCommand::CustomInvite(payload)) => {
            matchmaking
                .custom_invite(player_id, payload.room_id, payload.user_id)
                .await
        }
        (Endpoint::Waiting, ClientCommand::CustomAccept(payload)) => {
            matchmaking.custom_accept(player_id, payload.room_id).await
        }
        (Endpoint::Waiting, ClientCommand::CustomStart(payload)) => {
            matchmaking.custom_start(player_id, payload.room_id).await
        }
        (Endpoint::Waiting, ClientCommand::CustomLeave) => {
            matchmaking.custom_leave(player_id).await.map(|_| ())
        }
        (Endpoint::Tournament(tournament_id), ClientCommand::Ready) => {
            state.orchestrator.handle_ready(tournament_id, player_id).await
        }
        (endpoint, command) => Err(TournamentError::invalid(format!(
            "'{}' is not accepted in the {} namespace",
            command.event_name(),
            endpoint.namespace()
        ))
        .into()),
    };

    state
        .metrics_collector
        .record_command(name, outcome.is_ok(), started.elapsed());
    outcome
}
