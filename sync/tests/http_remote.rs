//! Tests for the HTTP remote store against an in-process service.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use shelf_engine::{Book, Entity, EntityType, Partnership};
use shelf_sync::{
    HttpRemoteStore, MemoryLocalStore, MemoryStateStore, NetworkError, Orchestrator, RemoteStore,
    SyncConfig,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret";

type Db = Arc<Mutex<BTreeMap<(String, String, String), Value>>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn list(
    State(db): State<Db>,
    Path((owner, collection)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    match owner.as_str() {
        "broken" => return Err(StatusCode::SERVICE_UNAVAILABLE),
        "garbage" => return Ok(Json(serde_json::json!([{ "entityType": "book", "id": 7 }]))),
        _ => {}
    }

    let db = db.lock().unwrap();
    let entities: Vec<Value> = db
        .iter()
        .filter(|((o, c, _), _)| *o == owner && *c == collection)
        .map(|(_, v)| v.clone())
        .collect();
    Ok(Json(Value::Array(entities)))
}

async fn upsert(
    State(db): State<Db>,
    Path((owner, collection, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    db.lock().unwrap().insert((owner, collection, id), body);
    StatusCode::NO_CONTENT
}

async fn remove(
    State(db): State<Db>,
    Path((owner, collection, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match db.lock().unwrap().remove(&(owner, collection, id)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn spawn_server() -> (String, Db) {
    let db: Db = Arc::default();
    let app = Router::new()
        .route("/owners/{owner}/{collection}", get(list))
        .route(
            "/owners/{owner}/{collection}/{id}",
            axum::routing::put(upsert).delete(remove),
        )
        .with_state(db.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), db)
}

fn client(base: &str, token: Option<&str>) -> HttpRemoteStore {
    HttpRemoteStore::new(base, token.map(String::from), Duration::from_secs(5)).unwrap()
}

fn book(id: &str) -> Entity {
    Entity::from(Book::new(id, "u-1", "Dune", "Frank Herbert", 1))
}

#[cfg(test)]
mod http_remote_tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_fetch_roundtrip() {
        let (base, db) = spawn_server().await;
        let remote = client(&base, Some(TOKEN));

        remote.create(&book("b-1")).await.unwrap();
        remote.update(&book("b-2")).await.unwrap();
        remote
            .create(&Entity::from(Partnership::new("p-1", "u-1", "u-2", 1)))
            .await
            .unwrap();

        let books = remote.fetch_all(EntityType::Book, "u-1").await.unwrap();
        assert_eq!(books, vec![book("b-1"), book("b-2")]);

        let stored = db.lock().unwrap();
        let key = ("u-1".to_string(), "books".to_string(), "b-1".to_string());
        assert_eq!(stored[&key]["entityType"], "book");
    }

    #[tokio::test]
    async fn test_delete_of_absent_entity_succeeds() {
        let (base, _) = spawn_server().await;
        let remote = client(&base, Some(TOKEN));

        remote.delete(EntityType::Book, "u-1", "missing").await.unwrap();

        remote.create(&book("b-1")).await.unwrap();
        remote.delete(EntityType::Book, "u-1", "b-1").await.unwrap();
        assert!(remote.fetch_all(EntityType::Book, "u-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let (base, _) = spawn_server().await;
        let remote = client(&base, None);

        let err = remote.create(&book("b-1")).await.unwrap_err();
        assert!(matches!(err, NetworkError::Rejected { status: 401, .. }));
        assert!(!err.is_not_connected());
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let (base, _) = spawn_server().await;
        let err = client(&base, Some(TOKEN))
            .fetch_all(EntityType::Book, "broken")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decode_error() {
        let (base, _) = spawn_server().await;
        let err = client(&base, Some(TOKEN))
            .fetch_all(EntityType::Book, "garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_not_connected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), Some(TOKEN))
            .fetch_all(EntityType::Book, "u-1")
            .await
            .unwrap_err();
        assert!(err.is_not_connected());
    }

    #[tokio::test]
    async fn test_full_cycle_over_http() {
        let (base, db) = spawn_server().await;
        let local = Arc::new(MemoryLocalStore::new());
        let orchestrator = Orchestrator::new(
            SyncConfig::new("u-1"),
            local.clone(),
            Arc::new(client(&base, Some(TOKEN))),
            Arc::new(MemoryStateStore::new()),
        )
        .unwrap();

        orchestrator.enqueue_offline_create(book("b-1")).await.unwrap();
        let result = orchestrator.sync_all().await.unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.pending_count, 0);
        assert_eq!(db.lock().unwrap().len(), 1);
        assert!(local.get(EntityType::Book, "b-1").is_some());
    }
}
