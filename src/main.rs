use axum::routing::get;
use axum::{Extension, Router};
use clap::Parser;
use dotenvy::dotenv;
use media_fetcher::app_state::AppState;
use media_fetcher::cache::HashCache;
use media_fetcher::config::{self, AppResources, Args, ConfigFile, CONFIG};
use media_fetcher::db::Db;
use media_fetcher::events::EventBus;
use media_fetcher::program::Program;
use media_fetcher::tracing::{init_tracer, LogChannel};
use media_fetcher::{scheduler, server, watcher};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = AppResources::initiate() {
        panic!("Could not initiate app resources: {err}");
    };
    let log_channel = init_tracer();

    if let Ok(path) = dotenv() {
        tracing::info!("Loaded env variables from: {}", path.display());
    }

    match ConfigFile::open_and_read().await {
        Ok(toml) => CONFIG.apply_toml_settings(toml),
        Err(err) => tracing::warn!("Could not read config file, using defaults: {err}"),
    };
    args.apply_configuration();

    let cancellation_token = CancellationToken::new();

    let db = Db::connect(AppResources::database_path())
        .await
        .expect("database to be reachable");
    let db = Box::leak(Box::new(db));

    let cache = HashCache::load(AppResources::hash_cache_path());
    let cache = Box::leak(Box::new(cache));

    let bus = Box::leak(Box::new(EventBus::new(db.clone())));

    let program = Program::new(db, cache, bus, cancellation_token.clone()).await;
    let program = Box::leak(Box::new(program));
    let tracker = program.tracker.clone();

    if let Err(e) = program.boot().await {
        tracing::error!("Library reconciliation failed: {e}");
    }

    if let Some(library_path) = CONFIG.get_value::<config::LibraryPath>().0 {
        if library_path.is_dir() {
            if let Err(e) =
                watcher::spawn(library_path, db, bus, cancellation_token.clone())
            {
                tracing::error!("Failed to start the library watcher: {e}");
            }
        }
    }

    scheduler::start(program, cancellation_token.clone());
    tokio::spawn(program.run());

    let app_state = AppState {
        db,
        cache,
        bus,
        program,
        cancellation_token: cancellation_token.clone(),
    };

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/log", get(LogChannel::into_sse_stream))
        .layer(Extension(log_channel))
        .nest("/api", server::router())
        .layer(cors)
        .with_state(app_state);

    let port = CONFIG.get_value::<config::Port>().0;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to start server on port {port}: {e}");
            return;
        }
    };
    tracing::info!("Starting server on port {port}");

    {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
                .unwrap();
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation_token.cancel();
        }
        _ = terminate_signal() => {
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }
    // no queue drain: in-flight provider calls are abandoned on purpose
    tracker.close();
    tracing::info!("Shut down");
}

#[cfg(unix)]
async fn terminate_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("sigterm handler to install");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
