//! Roster editing service.
//!
//!
//!
//! # General Infrastructure
//! - The identity provider issues a signed `session` cookie, this service only verifies it
//! - `GET /edit` is gated on that cookie, anything else is redirected to the entry page
//! - The `theme` query parameter survives the redirect, `light` unless `dark` was asked for
//! - Each user owns exactly one roster document, created on their first visit
//!
//!
//!
//! # Page Lifecycle
//!
//! - `GET /edit` loads (or creates) the user's document and opens a page
//! - The page id is embedded in the rendered form
//! - `POST /edit/{page}/events` applies one edit and answers with the new view right away
//! - The remote write for that edit is still in flight when the answer goes out
//! - `POST /edit/{page}/close` is sent on `pagehide`, idle pages are pruned after `PAGE_TTL_SECS`
//!
//!
//!
//! # Notes
//!
//! ## Optimistic Writes
//! The page state is the source of truth for as long as the page is open. Writes
//! are never awaited by the request that caused them and never rolled back. A
//! failed write leaves the slot flagged as unsynced until a later write for the
//! same field lands.
//!
//! ## Concurrent Pages
//! Two pages for the same user are not reconciled. Each write carries absolute
//! values, so the last write to reach Redis wins per field.
//!
//!
//!
//! # Setup
//!
//! Run against an in-memory store.
//! ```sh
//! mkdir -p secrets && echo dev-secret > secrets/SESSION_SECRET
//! STORE_BACKEND=memory SECRETS_DIR=secrets RUST_LOG=info cargo run --bin roster
//! ```
//!
//! Mint a session cookie for local testing.
//! ```sh
//! cargo run -p tester -- --uid alice --secret-file secrets/SESSION_SECRET
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod pages;
pub mod render;
pub mod routes;
pub mod state;
pub mod utils;

use routes::{close_handler, edit_handler, events_handler, health_handler, view_handler};
use state::State;

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/edit", get(edit_handler))
        .route("/edit/{page}", get(view_handler))
        .route("/edit/{page}/events", post(events_handler))
        .route("/edit/{page}/close", post(close_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::COOKIE, header::LOCATION},
        response::Response,
    };
    use roster::{DocRef, HmacSessions, MemoryStore, RetryPolicy};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{Config, StoreBackend},
        utils::unix_now,
    };

    const SECRET: &str = "test secret";

    static NEXT_EVENT: AtomicU64 = AtomicU64::new(1);

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        harness_with_ttl(Duration::from_secs(60))
    }

    fn harness_with_ttl(page_ttl: Duration) -> Harness {
        let config = Config {
            port: 0,
            redis_url: String::new(),
            store_backend: StoreBackend::Memory,
            collection: "users".to_string(),
            page_ttl,
            retry: RetryPolicy::none(),
            entry_path: "/".to_string(),
            session_secret: SECRET.to_string(),
        };
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(HmacSessions::new(SECRET).unwrap());

        Harness {
            app: router(State::from_parts(config, store.clone(), sessions)),
            store,
        }
    }

    fn session(user_id: &str) -> String {
        let token = HmacSessions::new(SECRET)
            .unwrap()
            .mint(user_id, unix_now() + 600)
            .unwrap();
        format!("session={token}")
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_edit(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.body(Body::empty()).unwrap()
    }

    fn post_event(page: &str, cookie: &str, event: Value) -> Request<Body> {
        post_numbered(page, cookie, NEXT_EVENT.fetch_add(1, Ordering::Relaxed), event)
    }

    fn post_numbered(page: &str, cookie: &str, seq: u64, mut event: Value) -> Request<Body> {
        event["seq"] = json!(seq);
        Request::post(format!("/edit/{page}/events"))
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(event.to_string()))
            .unwrap()
    }

    async fn open_page(app: &Router, cookie: &str) -> String {
        let response = send(app, get_edit("/edit", Some(cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        let start = html.find(r#"data-page=""#).unwrap() + r#"data-page=""#.len();
        let end = start + html[start..].find('"').unwrap();
        html[start..end].to_string()
    }

    async fn view(response: Response) -> Value {
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_missing_session_redirects() {
        let Harness { app, .. } = harness();

        let response = send(&app, get_edit("/edit", None)).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "/?theme=light");

        let response = send(&app, get_edit("/edit?theme=dark", None)).await;
        assert_eq!(response.headers()[LOCATION], "/?theme=dark");
    }

    #[tokio::test]
    async fn test_forged_session_redirects() {
        let Harness { app, store } = harness();
        let forged = HmacSessions::new("wrong secret")
            .unwrap()
            .mint("alice", unix_now() + 600)
            .unwrap();

        let response = send(
            &app,
            get_edit("/edit?theme=dark", Some(&format!("session={forged}"))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "/?theme=dark");
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn test_first_visit_creates_document() {
        let Harness { app, store } = harness();

        open_page(&app, &session("alice")).await;

        assert_eq!(store.sets(), 1);
        assert!(store.document(&DocRef::new("users", "alice")).is_some());

        open_page(&app, &session("alice")).await;
        assert_eq!(store.sets(), 1);
        assert_eq!(store.gets(), 2);
    }

    #[tokio::test]
    async fn test_events_update_view_and_store() {
        let Harness { app, store } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        let response = send(
            &app,
            post_event(&page, &cookie, json!({"op": "rename", "slot": 5, "name": "Alice"})),
        )
        .await;
        assert_eq!(view(response).await["slots"][5]["name"], "Alice");

        for _ in 0..3 {
            send(&app, post_event(&page, &cookie, json!({"op": "increment", "slot": 5}))).await;
        }
        let response = send(
            &app,
            post_event(&page, &cookie, json!({"op": "decrement", "slot": 5})),
        )
        .await;
        assert_eq!(view(response).await["slots"][5]["likes"], 2);

        // Let the spawned writes land.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let document = store.document(&DocRef::new("users", "alice")).unwrap();
        assert_eq!(document["memberName5"], "Alice");
        assert_eq!(document["like5"], 2);
    }

    #[tokio::test]
    async fn test_late_rename_is_rejected() {
        let Harness { app, store } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        let response = send(
            &app,
            post_numbered(&page, &cookie, 2, json!({"op": "rename", "slot": 3, "name": "Alice"})),
        )
        .await;
        assert_eq!(view(response).await["slots"][3]["name"], "Alice");

        // The earlier keystroke overtaken in flight.
        let response = send(
            &app,
            post_numbered(&page, &cookie, 1, json!({"op": "rename", "slot": 3, "name": "Alic"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let request = Request::get(format!("/edit/{page}"))
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        assert_eq!(view(send(&app, request).await).await["slots"][3]["name"], "Alice");

        tokio::time::sleep(Duration::from_millis(20)).await;

        let document = store.document(&DocRef::new("users", "alice")).unwrap();
        assert_eq!(document["memberName3"], "Alice");
        assert_eq!(store.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_unnumbered_event_is_malformed() {
        let Harness { app, .. } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        let request = Request::post(format!("/edit/{page}/events"))
            .header(COOKIE, &cookie)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"op": "increment", "slot": 1}).to_string()))
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pruned_page_events_are_not_found() {
        let Harness { app, .. } = harness_with_ttl(Duration::ZERO);
        let alice = session("alice");
        let page = open_page(&app, &alice).await;

        // Any later visit prunes pages idle past the TTL.
        open_page(&app, &session("bob")).await;

        let response = send(
            &app,
            post_event(&page, &alice, json!({"op": "increment", "slot": 1})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_gesture() {
        let Harness { app, .. } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        send(&app, post_event(&page, &cookie, json!({"op": "increment", "slot": 0}))).await;

        let response = send(&app, post_event(&page, &cookie, json!({"op": "reset", "slot": 0}))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(
            &app,
            post_event(&page, &cookie, json!({"op": "confirm_reset", "slot": 0})),
        )
        .await;
        assert_eq!(view(response).await["slots"][0]["reset"], "confirming");

        let response = send(&app, post_event(&page, &cookie, json!({"op": "reset", "slot": 0}))).await;
        let view = view(response).await;
        assert_eq!(view["slots"][0]["likes"], 0);
        assert_eq!(view["slots"][0]["reset"], "idle");
    }

    #[tokio::test]
    async fn test_rejects_bad_events() {
        let Harness { app, .. } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        let response = send(&app, post_event(&page, &cookie, json!({"op": "increment", "slot": 29}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, post_event(&page, &cookie, json!({"op": "explode"}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            post_event(&Uuid::new_v4().to_string(), &cookie, json!({"op": "reset_all"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pages_are_private() {
        let Harness { app, .. } = harness();
        let page = open_page(&app, &session("alice")).await;

        let response = send(
            &app,
            post_event(&page, &session("mallory"), json!({"op": "increment", "slot": 1})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let request = Request::post(format!("/edit/{page}/events"))
            .body(Body::from(json!({"op": "increment", "slot": 1}).to_string()))
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_close_page() {
        let Harness { app, .. } = harness();
        let cookie = session("alice");
        let page = open_page(&app, &cookie).await;

        let request = Request::post(format!("/edit/{page}/close"))
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::NO_CONTENT);

        let request = Request::get(format!("/edit/{page}"))
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::NOT_FOUND);
    }
}
