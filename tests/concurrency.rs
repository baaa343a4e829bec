//! Concurrency tests for cohort formation, readiness and result handling
//!
//! These run on a multi-threaded runtime and check that racing callers never
//! form a cohort twice, overfill a room, start a round twice or record a
//! result twice.

mod fixtures;

use bracket_room::amqp::messages::DomainEvent;
use bracket_room::error::{as_tournament_error, TournamentError};
use bracket_room::session::gateway::Endpoint;
use bracket_room::types::{PlayerId, TournamentSize};
use futures::future::join_all;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use fixtures::{result_for, TestSystem};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_form_disjoint_cohorts() {
    let system = TestSystem::new().await;
    let handlers = system.app.matchmaking().clone();
    let players: Vec<PlayerId> = (1..=32).collect();

    let start = Instant::now();
    let tasks = players.iter().map(|player| {
        let handlers = handlers.clone();
        let player = *player;
        tokio::spawn(async move { handlers.auto_join(player, TournamentSize::Four).await })
    });
    for outcome in join_all(tasks).await {
        outcome.expect("task panicked").expect("join succeeded");
    }
    let elapsed = start.elapsed();

    let requests = system.publisher.tournament_requests();
    assert_eq!(requests.len(), 8);

    let mut seen = HashSet::new();
    for request in &requests {
        assert_eq!(request.players.len(), 4);
        for player in &request.players {
            assert!(seen.insert(*player), "player {} placed twice", player);
        }
    }
    assert_eq!(seen.len(), players.len());
    assert_eq!(
        handlers.queue().len(TournamentSize::Four).await.unwrap(),
        0
    );
    assert!(
        elapsed < Duration::from_secs(5),
        "32 joins took {:?}",
        elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_joins_queue_once() {
    let system = TestSystem::new().await;
    let handlers = system.app.matchmaking().clone();

    let tasks = (0..8).map(|_| {
        let handlers = handlers.clone();
        tokio::spawn(async move { handlers.auto_join(7, TournamentSize::Sixteen).await })
    });
    let accepted = join_all(tasks)
        .await
        .into_iter()
        .filter(|outcome| matches!(outcome, Ok(Ok(()))))
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(
        handlers.queue().players(TournamentSize::Sixteen).await.unwrap(),
        vec![7]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_room_joins_fill_each_seat_once() {
    let system = TestSystem::new().await;
    let rooms = system.app.matchmaking().rooms().clone();
    let room_id = rooms.create(1, TournamentSize::Four).await.unwrap();
    let invitees: Vec<PlayerId> = (2..=7).collect();
    for player in &invitees {
        rooms.invite(room_id, *player).await.unwrap();
    }

    let tasks = invitees.iter().map(|player| {
        let rooms = rooms.clone();
        let player = *player;
        tokio::spawn(async move { rooms.join(room_id, player).await })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|outcome| outcome.expect("task panicked"))
        .collect();

    let joined = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let full = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .filter(|error| {
            matches!(
                as_tournament_error(error),
                Some(TournamentError::RoomFull { .. })
            )
        })
        .count();
    assert_eq!(joined, 3);
    assert_eq!(full, 3);

    let members = rooms.members(room_id).await.unwrap();
    assert_eq!(members.len(), 4);
    assert_eq!(members[0], 1);
    for player in &invitees {
        let seated = rooms.room_of(*player).await.unwrap().is_some();
        assert_eq!(seated, members.contains(player));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ready_starts_round_once() {
    let system = TestSystem::new().await;

    for player in 1..=8 {
        let client = system.connect(Endpoint::Waiting, player).await;
        system
            .send(
                &client,
                bracket_room::session::messages::ClientCommand::AutoJoin(
                    bracket_room::session::messages::SizePayload {
                        tournament_size: TournamentSize::Eight,
                    },
                ),
            )
            .await
            .unwrap();
    }
    let tournament_id = system.deliver_tournament_requests().await[0];

    let orchestrator = system.app.orchestrator().clone();
    let tasks = (1..=8).map(|player| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.handle_ready(tournament_id, player).await })
    });
    for outcome in join_all(tasks).await {
        outcome.expect("task panicked").expect("ready accepted");
    }

    let requests = system.publisher.match_requests();
    assert_eq!(requests.len(), 4);
    let matches: HashSet<_> = requests.iter().map(|r| r.match_id).collect();
    assert_eq!(matches.len(), 4);

    let servers = orchestrator.stores().match_servers.servers().await.unwrap();
    let hosted: i64 = servers.iter().map(|server| server.game_count).sum();
    assert_eq!(hosted, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_results_recorded_once() {
    let system = TestSystem::new().await;

    for player in [21, 22] {
        let client = system.connect(Endpoint::Waiting, player).await;
        system
            .send(
                &client,
                bracket_room::session::messages::ClientCommand::AutoJoin(
                    bracket_room::session::messages::SizePayload {
                        tournament_size: TournamentSize::Two,
                    },
                ),
            )
            .await
            .unwrap();
    }
    let tournament_id = system.deliver_tournament_requests().await[0];
    for player in [21, 22] {
        system
            .app
            .orchestrator()
            .handle_ready(tournament_id, player)
            .await
            .unwrap();
    }
    let request = system.publisher.match_requests()[0].clone();
    let result = result_for(&request, request.player1_id);

    let orchestrator = system.app.orchestrator().clone();
    let tasks = (0..6).map(|_| {
        let orchestrator = orchestrator.clone();
        let result = result.clone();
        tokio::spawn(async move {
            use bracket_room::amqp::handlers::EventHandler;
            orchestrator
                .handle_event(DomainEvent::MatchResult(result))
                .await
        })
    });
    for outcome in join_all(tasks).await {
        outcome.expect("task panicked").expect("result acknowledged");
    }

    let stats = orchestrator.get_stats().await.unwrap();
    assert_eq!(stats.results_recorded, 1);
    assert_eq!(stats.duplicate_results, 5);
    assert_eq!(stats.tournaments_finished, 1);
}
