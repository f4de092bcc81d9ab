// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Togglesvc: probabilistic feature-toggle service with sticky
//! per-session assignments.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod reaper;
pub mod retry;
pub mod session;
pub mod toggle;
pub mod transport;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, PgCatalog};
use crate::config::SvcConfig;
use crate::engine::Engine;
use crate::retry::Retry;
use crate::session::{RedisSessions, SessionStore};
use crate::transport::build_router;

const DIAL_TRIES: u32 = 3;

/// Shared service state: the assignment engine plus direct catalog
/// access for the admin endpoints.
pub struct SvcState {
    pub engine: Engine,
    pub catalog: Arc<dyn Catalog>,
}

/// Run the service until shutdown.
pub async fn run(config: SvcConfig) -> anyhow::Result<()> {
    for (key, val) in [
        ("APP_DB", &config.db),
        ("APP_REDIS", &config.redis),
        ("APP_ADDR", &config.addr),
        ("APP_EXPIRATION", &config.expiration),
    ] {
        anyhow::ensure!(!val.is_empty(), "{key} is not set or empty");
    }

    let ttl = config.session_ttl()?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let dial = Retry::new(DIAL_TRIES);

    let pool = {
        let dsn = config.db.clone();
        dial.run("db", move || {
            let dsn = dsn.clone();
            async move { Ok(PgPoolOptions::new().connect(&dsn).await?) }
        })
        .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(config.redis.as_str())?;
    let redis_conn = {
        let client = redis_client.clone();
        dial.run("redis", move || {
            let client = client.clone();
            async move { Ok(client.get_connection_manager().await?) }
        })
        .await?
    };

    let catalog: Arc<dyn Catalog> = Arc::new(PgCatalog::new(pool));
    let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessions::new(redis_conn, ttl));

    let tracker = reaper::spawn(
        Arc::clone(&sessions),
        config.sweep_interval(),
        config.tracker_capacity,
        config.tracker_wait(),
        shutdown.clone(),
    );

    let engine = Engine::new(Arc::clone(&catalog), sessions, tracker);
    let state = Arc::new(SvcState { engine, catalog });

    let router = build_router(state, config.http_timeout());
    let listener = TcpListener::bind(&config.addr).await?;

    tracing::info!("togglesvc listening on {}", config.addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
