//! Integration tests against fake upstream services.
//!
//! A small Axum server stands in for the hosted REST API and the realtime
//! socket so the real clients can be exercised over the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, RawQuery, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use sendguard::config::StoreConfig;
use sendguard::error::{RealtimeError, StoreError};
use sendguard::realtime::{ChangeFeed, ChangeKind, PhoenixChangeFeed};
use sendguard::records::{Permission, Queue, RecordUpdate};
use sendguard::store::{PostgrestStore, RecordStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const KEY: &str = "service-key";
const TABLE: &str = "n8n_to_supabase";

#[derive(Clone, Default)]
struct FakeRest {
    /// Raw query strings, one per request.
    queries: Arc<Mutex<Vec<String>>>,
    /// Request bodies seen by PATCH.
    patches: Arc<Mutex<Vec<Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    let apikey = headers.get("apikey").and_then(|v| v.to_str().ok());
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    apikey == Some(KEY) && bearer == Some(format!("Bearer {KEY}").as_str())
}

fn row(id: i64) -> Value {
    json!({
        "id": id,
        "created_at": "2026-03-01T10:00:00.123456+00:00",
        "permission": "Waiting",
        "removed": null,
        "replied": null,
        "Objection_nai": null,
        "edited": "2",
        "email_subject": "Pricing question"
    })
}

async fn list_rows(
    State(state): State<FakeRest>,
    Path(table): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad key"})));
    }
    if table != TABLE {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "no such table"})));
    }
    let query = query.unwrap_or_default();
    state.queries.lock().unwrap().push(query.clone());
    if query.contains("id=eq.404") {
        return (StatusCode::OK, Json(json!([])));
    }
    if query.contains("id=eq.") {
        return (StatusCode::OK, Json(json!([row(7)])));
    }
    (StatusCode::OK, Json(json!([row(2), row(1)])))
}

async fn patch_rows(
    State(state): State<FakeRest>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if headers.get("prefer").and_then(|v| v.to_str().ok()) != Some("return=representation") {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "missing Prefer"})));
    }
    state.patches.lock().unwrap().push(body.clone());
    if query.unwrap_or_default().contains("id=eq.404") {
        return (StatusCode::OK, Json(json!([])));
    }
    let mut updated = row(7);
    if let (Some(target), Some(fields)) = (updated.as_object_mut(), body.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    (StatusCode::OK, Json(json!([updated])))
}

async fn delete_rows(RawQuery(query): RawQuery) -> impl IntoResponse {
    if query.unwrap_or_default().contains("id=eq.404") {
        return Json(json!([]));
    }
    Json(json!([row(7)]))
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn start_rest() -> (String, FakeRest) {
    let state = FakeRest::default();
    let app = Router::new()
        .route(
            "/rest/v1/{table}",
            get(list_rows).patch(patch_rows).delete(delete_rows),
        )
        .route("/broken/rest/v1/{table}", get(broken))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), state)
}

fn store(url: &str) -> PostgrestStore {
    PostgrestStore::new(StoreConfig::new(url, KEY, TABLE).unwrap())
}

// ── REST ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_sends_filters_and_reads_nulls_as_false() {
    timeout(TEST_TIMEOUT, async {
        let (url, fake) = start_rest().await;
        let records = store(&url).list(Some(Queue::ManualReply), None).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 2);
        assert!(!records[0].removed);
        assert!(!records[0].objection_nai);
        assert_eq!(records[0].edited, Some(2));
        assert_eq!(records[0].permission, Some(Permission::Waiting));

        let queries = fake.queries.lock().unwrap();
        let query = &queries[0];
        assert!(query.starts_with("select=*"));
        assert!(query.contains("replied=not.is.true"));
        assert!(query.contains("removed=not.is.true"));
        assert!(query.ends_with("order=created_at.desc"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn wrong_key_is_a_status_error() {
    timeout(TEST_TIMEOUT, async {
        let (url, _fake) = start_rest().await;
        let store = PostgrestStore::new(StoreConfig::new(&url, "other-key", TABLE).unwrap());
        let err = store.list(None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 401, .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn server_error_is_reported() {
    timeout(TEST_TIMEOUT, async {
        let (url, _fake) = start_rest().await;
        let err = store(&format!("{url}/broken"))
            .list(None, None)
            .await
            .unwrap_err();
        match err {
            StoreError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_store_is_a_request_error() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = store(&format!("http://127.0.0.1:{port}"))
            .list(None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Request { .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn update_sends_only_changed_fields() {
    timeout(TEST_TIMEOUT, async {
        let (url, fake) = start_rest().await;
        let update = RecordUpdate {
            permission: Some(Some(Permission::ManualHandle)),
            feedback: Some(Some("Needs a human".into())),
            ..Default::default()
        };
        let record = store(&url).update(7, &update).await.unwrap();
        assert_eq!(record.permission, Some(Permission::ManualHandle));
        assert_eq!(record.feedback.as_deref(), Some("Needs a human"));

        let patches = fake.patches.lock().unwrap();
        assert_eq!(
            patches[0],
            json!({"permission": "Manual Handle", "feedback": "Needs a human"})
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stale_ids_are_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (url, _fake) = start_rest().await;
        let store = store(&url);

        assert!(store.get(404).await.unwrap().is_none());
        assert_eq!(store.get(7).await.unwrap().unwrap().id, 7);

        let err = store.update(404, &RecordUpdate::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id: 404, .. }));

        assert!(store.delete(7).await.is_ok());
        assert!(matches!(
            store.delete(404).await,
            Err(StoreError::NotFound { id: 404, .. })
        ));
    })
    .await
    .expect("test timed out");
}

// ── Realtime ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct FakeRealtime {
    /// Every text frame the client sent.
    frames: mpsc::UnboundedSender<Value>,
    /// Fires when the client's socket goes away.
    closed: mpsc::UnboundedSender<()>,
}

async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<FakeRealtime>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| fake_phoenix(socket, state))
}

async fn fake_phoenix(mut socket: WebSocket, state: FakeRealtime) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let frame: Value = serde_json::from_str(&text).unwrap();
        let _ = state.frames.send(frame.clone());

        if frame["event"] == "phx_join" {
            let topic = frame["topic"].clone();
            let reply = json!({
                "topic": topic, "event": "phx_reply", "ref": "1",
                "payload": {"status": "ok", "response": {}}
            });
            let change = json!({
                "topic": topic, "event": "postgres_changes", "ref": null,
                "payload": {"data": {
                    "type": "UPDATE", "table": TABLE,
                    "record": {"id": 42, "permission": "Approval"},
                    "old_record": {"id": 42}
                }}
            });
            let _ = socket.send(Message::Text(reply.to_string().into())).await;
            let _ = socket.send(Message::Text(change.to_string().into())).await;
        }
    }
    let _ = state.closed.send(());
}

#[tokio::test]
async fn phoenix_feed_joins_delivers_and_heartbeats() {
    timeout(TEST_TIMEOUT, async {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/realtime/v1/websocket", get(realtime_handler))
            .with_state(FakeRealtime {
                frames: frames_tx,
                closed: closed_tx,
            });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let config = StoreConfig::new(format!("http://127.0.0.1:{port}"), KEY, TABLE).unwrap();
        let feed = PhoenixChangeFeed::new(config).with_heartbeat(Duration::from_millis(100));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let subscription = feed
            .subscribe(Arc::new(move |event| {
                let _ = events_tx.send(event);
            }))
            .await
            .expect("subscribe failed");
        assert_eq!(subscription.name(), format!("realtime:public:{TABLE}"));

        let join = frames_rx.recv().await.unwrap();
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["payload"]["config"]["postgres_changes"][0]["table"], TABLE);

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record_id, Some(42));
        assert_eq!(event.table, TABLE);

        let heartbeat = frames_rx.recv().await.unwrap();
        assert_eq!(heartbeat["topic"], "phoenix");
        assert_eq!(heartbeat["event"], "heartbeat");

        // Cancelling the subscription closes the socket
        subscription.cancel();
        closed_rx.recv().await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn phoenix_feed_reports_connect_failure() {
    timeout(TEST_TIMEOUT, async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = StoreConfig::new(format!("http://127.0.0.1:{port}"), KEY, TABLE).unwrap();
        let result = PhoenixChangeFeed::new(config)
            .subscribe(Arc::new(|_| {}))
            .await;
        assert!(result.is_err());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn phoenix_feed_gives_up_on_a_silent_server() {
    timeout(TEST_TIMEOUT, async {
        // Accepts TCP but never answers the WebSocket handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let config = StoreConfig::new(format!("http://127.0.0.1:{port}"), KEY, TABLE).unwrap();
        let result = PhoenixChangeFeed::new(config)
            .with_connect_timeout(Duration::from_millis(300))
            .subscribe(Arc::new(|_| {}))
            .await;
        match result {
            Err(RealtimeError::Connect(reason)) => assert!(reason.contains("timed out")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("subscribe should not succeed"),
        }
        held.abort();
    })
    .await
    .expect("test timed out");
}
