use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use watchtower_core::{LogSink, MemoryStore};
use watchtower_types::models::{AppConfig, WatchKind};

use super::*;
use crate::state::AppState;

fn test_state(mut config: AppConfig) -> AppState {
    config.api.mirror_urls = vec!["https://m1.example".to_string()];
    AppState::new(config, Arc::new(MemoryStore::new()), Arc::new(LogSink)).unwrap()
}

#[tokio::test]
async fn test_status_reports_pool_sizes() {
    let state = test_state(AppConfig::default());
    let Json(status) = get_status(State(state)).await;
    assert_eq!(status.mirror_count, 1);
    assert_eq!(status.active_watches, 0);
}

#[tokio::test]
async fn test_watch_lifecycle_via_handlers() {
    let state = test_state(AppConfig::default());

    let created = start_watch(
        State(state.clone()),
        Json(StartWatchRequest {
            handle: "alice".to_string(),
            kind: WatchKind::Disappearance,
            operator: 0,
        }),
    )
    .await
    .unwrap();
    assert_eq!(created, StatusCode::CREATED);

    let Json(watches) = list_watches(State(state.clone())).await;
    assert_eq!(watches.len(), 1);
    assert_eq!(watches[0].handle, "alice");

    let stopped = stop_watch(
        State(state.clone()),
        Path("alice".to_string()),
        Query(OperatorQuery { operator: 0 }),
    )
    .await
    .unwrap();
    assert_eq!(stopped, StatusCode::NO_CONTENT);
    assert!(list_watches(State(state)).await.0.is_empty());
}

#[tokio::test]
async fn test_duplicate_watch_conflicts() {
    let state = test_state(AppConfig::default());
    let req = || StartWatchRequest {
        handle: "alice".to_string(),
        kind: WatchKind::Disappearance,
        operator: 0,
    };
    start_watch(State(state.clone()), Json(req())).await.unwrap();
    let (status, _) = start_watch(State(state), Json(req())).await.unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unauthorized_watch_is_forbidden() {
    let mut config = AppConfig::default();
    config.owner_id = 1;
    let state = test_state(config);

    let (status, _) = start_watch(
        State(state),
        Json(StartWatchRequest {
            handle: "alice".to_string(),
            kind: WatchKind::Reappearance,
            operator: 99,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_endpoint_management() {
    let state = test_state(AppConfig::default());

    let added = add_endpoint(
        State(state.clone()),
        Json(UrlRequest { url: "https://m2.example".to_string() }),
    )
    .await
    .unwrap();
    assert_eq!(added, StatusCode::CREATED);

    let (dup, _) = add_endpoint(
        State(state.clone()),
        Json(UrlRequest { url: "https://m2.example".to_string() }),
    )
    .await
    .unwrap_err();
    assert_eq!(dup, StatusCode::CONFLICT);

    let Json(endpoints) = list_endpoints(State(state.clone())).await;
    assert_eq!(endpoints.len(), 2);

    let removed = remove_endpoint(
        State(state.clone()),
        Json(UrlRequest { url: "https://m2.example".to_string() }),
    )
    .await
    .unwrap();
    assert_eq!(removed, StatusCode::NO_CONTENT);

    let (missing, _) = remove_endpoint(
        State(state),
        Json(UrlRequest { url: "https://m2.example".to_string() }),
    )
    .await
    .unwrap_err();
    assert_eq!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_user_roster_requires_owner() {
    let mut config = AppConfig::default();
    config.owner_id = 1;
    let state = test_state(config);

    let (forbidden, _) =
        add_user(State(state.clone()), Json(UserRequest { user_id: 5, operator: 2 }))
            .await
            .unwrap_err();
    assert_eq!(forbidden, StatusCode::FORBIDDEN);

    add_user(State(state.clone()), Json(UserRequest { user_id: 5, operator: 1 })).await.unwrap();
    let Json(users) = list_users(State(state.clone())).await.unwrap();
    assert_eq!(users, vec![5]);

    remove_user(State(state), Json(UserRequest { user_id: 5, operator: 1 })).await.unwrap();
}

#[tokio::test]
async fn test_stats_endpoint_aggregates() {
    let state = test_state(AppConfig::default());
    let Json(stats) = get_stats(State(state)).await.unwrap();
    assert_eq!(stats.monitor.total_checks, 0);
    assert_eq!(stats.store.sessions, 0);
    assert_eq!(stats.mirrors.len(), 1);
    assert!(stats.proxies.is_empty());
}
