use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::middleware::require_auth;
use courier_api::{AppState, AppStateInner, auth, conversations, messages};
use courier_gateway::connection;
use courier_gateway::coordinator::Coordinator;
use courier_gateway::registry::PresenceRegistry;

#[derive(Clone)]
struct ServerState {
    coordinator: Coordinator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(courier_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the registry lives for the whole server process, the
    // coordinator is the single write path shared by both transports.
    let registry = PresenceRegistry::new();
    let coordinator = Coordinator::new(db.clone(), registry);
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        coordinator: coordinator.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/users", get(auth::list_users))
        .route(
            "/conversations/{partner_id}/messages",
            get(conversations::get_conversation),
        )
        .route("/messages/send", post(messages::send_message))
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/messages/unread", get(conversations::unread_counts))
        .route("/messages/read/{partner_id}", patch(conversations::mark_read))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { coordinator });

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Courier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.coordinator))
}
