use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swecc_sockets::config::Config;
use swecc_sockets::handlers;
use swecc_sockets::mq::consumers::reviewed_resume_consumer;
use swecc_sockets::mq::{RabbitBridge, DEFAULT_EXCHANGE};
use swecc_sockets::runtime::DockerLogSource;
use swecc_sockets::state::AppState;
use swecc_sockets::websocket;

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "swecc_sockets=info,tower_http=info,lapin=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 SWECC Sockets starting...");

    let config = Config::from_env();
    info!("📝 Configuration loaded");

    let state = AppState::new(&config.jwt_secret);

    // Service handlers subscribe on their emitters exactly once, here.
    let log_source = Arc::new(
        DockerLogSource::from_env().expect("Failed to connect to the container runtime"),
    );
    handlers::register_all(&state, log_source).await;
    info!("✅ Service handlers registered");

    // AMQP bridge: the resume-review consumer plus a producer on the default
    // socket exchange. Startup failures are retried by the health monitor.
    let bridge = RabbitBridge::new(&config.amqp_url());
    bridge
        .add_consumer(reviewed_resume_consumer(state.registry.clone()))
        .await
        .expect("Duplicate AMQP consumer registration");
    bridge
        .add_producer("socket-events", DEFAULT_EXCHANGE, None)
        .await;
    bridge.start().await;
    bridge.spawn_health_monitor().await;

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_production {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        info!("🔒 CORS: production mode, allowing origins: {:?}", config.cors_origins);
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/", get(handlers::root_status))
        .route("/ping", get(handlers::ping))
        .route("/ws/:service/:token", get(websocket::websocket_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = config.server_addr();
    info!("🎧 Gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");

    bridge.shutdown().await;
    info!("👋 Goodbye");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to listen for shutdown signal");
    }
}
