mod server;

use crate::server::ServerState;
use agora_common::model::{
    Id,
    auth::{AuthToken, AuthTokenHashError, Credential},
    user::{Role, User, UserMarker},
};
use agora_db::{DbClient, MemoryStore, Store, StoreError};
use agora_moderation::{Moderation, ModerationConfig};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEV_ADMIN_ID: Id<UserMarker> = Id::new(1);

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("DATABASE_URL must be set for the postgres backend")]
    MissingDatabaseUrl,
    #[error("Error setting up the store: {0}")]
    Store(#[from] StoreError),
    #[error("Error hashing the development token: {0}")]
    Hash(#[from] AuthTokenHashError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default)]
    store_backend: StoreBackend,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default = "default_run_migrations")]
    run_migrations: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_run_migrations() -> bool {
    true
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agora_api=debug,\
                agora_moderation=debug,\
                agora_db=debug,\
                agora_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<(Env, ModerationConfig), InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    let env = envy::from_env()?;
    let moderation = envy::prefixed("MODERATION_").from_env()?;

    Ok((env, moderation))
}

/// Seeds an admin so the in-memory backend can be used without a database.
async fn seed_memory_store(store: &MemoryStore) -> Result<(), InitError> {
    let admin = User {
        id: DEV_ADMIN_ID,
        name: "Development Admin".to_owned(),
        email: "admin@localhost".to_owned(),
        role: Role::Admin,
        warnings: 0,
    };
    store.insert_user(admin).await;

    let token = AuthToken::generate_random(DEV_ADMIN_ID);
    store
        .insert_credential(Credential {
            user: DEV_ADMIN_ID,
            token_hash: token.hash()?,
            created_at: OffsetDateTime::now_utc(),
            expires_after: None,
        })
        .await;

    warn!(
        token = %token.as_token_str(),
        "Using the in-memory store, data is lost on shutdown"
    );
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

async fn serve<S: Store>(
    store: S,
    config: ModerationConfig,
    server_address: SocketAddr,
) -> Result<(), InitError> {
    let state = ServerState::new(Moderation::new(store, config));

    let app = server::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    info!("Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let (env, config) = get_env()?;
    debug!(?config, "Loaded moderation config");

    let server_address = SocketAddr::new(env.server_address, env.server_port);

    match env.store_backend {
        StoreBackend::Postgres => {
            let database_url = env.database_url.ok_or(InitError::MissingDatabaseUrl)?;
            let client = DbClient::connect(&database_url, env.database_max_connections).await?;
            if env.run_migrations {
                client.migrate().await?;
            }
            serve(client, config, server_address).await
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            seed_memory_store(&store).await?;
            serve(store, config, server_address).await
        }
    }
}
