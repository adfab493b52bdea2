mod context;
mod errors;
mod gateway;
mod rest;
mod schemas;

use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{routing::get, Router};
use bandstand_core::Config;
use bandstand_session::{Session, YouTubeProvider};
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::{Limits, ServerContext};
use gateway::{gateway_handler, relay_event, Gateway};

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

/// How often the rate limiters and search cache are pruned.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Starts the bandstand server.
pub async fn run_server() {
    let port = env::var("BANDSTAND_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let api_key = env::var("YOUTUBE_API_KEY").ok();

    if api_key.is_none() {
        info!("YOUTUBE_API_KEY is not set, metadata lookups will be unavailable");
    }

    let config = Config::default();

    let (session, mut events) = Session::new(config.clone());

    let provider = Arc::new(YouTubeProvider::new(api_key));

    let context = ServerContext {
        config: config.clone(),
        session: Arc::new(session),
        provider: provider.clone(),
        gateway: Gateway::new(config.clone()),
        limits: Arc::new(Limits::new()),
    };

    // Drains room events into gateway broadcasts.
    let event_context = context.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            relay_event(&event_context, event);
        }
    });

    // Reservation expiry, the playback watchdog, and position snapshots.
    let tick_context = context.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.snapshot_interval);

        loop {
            interval.tick().await;
            tick_context.session.rooms.tick();
        }
    });

    let cleanup_context = context.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            cleanup_context.limits.cleanup();
            provider.clean_cache();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/v1/rooms", get(rest::list_rooms))
        .route("/v1/search", get(rest::search))
        .layer(cors)
        .with_state(context);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {port}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server runs");
}
