use std::sync::{atomic::AtomicUsize, Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use parking_lot::RwLock;
use sqlx::mysql::MySqlPoolOptions;
use tokio::sync::Notify;

use crate::{
    bufpool::BufferPool,
    config::Config,
    persistence::{self, Streams},
    stats::Stats,
    state::{ClientWhitelist, InfoHash2Id, Passkey2Id, TorrentMap, UserMap},
};

#[cfg(feature = "event_log")]
use crate::event_log::EventLog;

/// The shared, `Arc`-held context passed to every request handler and
/// background task. Holds the in-memory swarm state, the persistence
/// streams bridging it to the database, and the bookkeeping needed for a
/// clean shutdown.
pub struct Tracker {
    pub config: Config,
    pub pool: sqlx::MySqlPool,

    pub users: RwLock<UserMap>,
    pub passkey2id: RwLock<Passkey2Id>,
    pub torrents: RwLock<TorrentMap>,
    pub infohash2id: RwLock<InfoHash2Id>,
    pub whitelist: RwLock<ClientWhitelist>,

    pub streams: Streams,
    pub stats: Stats,
    pub buffers: BufferPool,

    /// Requests currently executing. Incremented on entry, decremented on
    /// drop by the dispatcher's counting middleware, so shutdown can wait
    /// for in-flight work to drain.
    pub in_flight: AtomicUsize,
    pub in_flight_drained: Notify,

    #[cfg(feature = "event_log")]
    pub event_log: Option<EventLog>,
}

impl Tracker {
    /// Loads configuration, connects to the database, performs the initial
    /// full reload of users/torrents, and returns the shared tracker handle
    /// ready to be wired into the HTTP listener and background scheduler.
    pub async fn bootstrap() -> Result<Arc<Tracker>> {
        if dotenv().is_err() {
            tracing::debug!("no .env file found, continuing with process environment only");
        }

        let config = Config::from_env().context("failed loading configuration")?;

        tracing::info!("connecting to database");
        let pool = connect_to_database(&config.database_url).await?;

        let users = RwLock::new(UserMap::default());
        let passkey2id = RwLock::new(Passkey2Id::default());
        let torrents = RwLock::new(TorrentMap::default());
        let infohash2id = RwLock::new(InfoHash2Id::default());
        let whitelist = RwLock::new(ClientWhitelist::new());

        tracing::info!("loading users from database");
        persistence::reload_users(&pool, &users, &passkey2id).await?;
        tracing::info!(count = users.read().len(), "loaded users");

        tracing::info!("loading torrents from database");
        persistence::reload_torrents(&pool, &torrents, &infohash2id).await?;
        tracing::info!(count = torrents.read().len(), "loaded torrents");

        if config.whitelist_enabled {
            tracing::info!("loading client whitelist from database");
            persistence::reload_whitelist(&pool, &whitelist).await?;
            tracing::info!(count = whitelist.read().len(), "loaded whitelisted client prefixes");
        }

        #[cfg(feature = "event_log")]
        let event_log = match &config.event_log_path {
            Some(path) => Some(EventLog::new(path)?),
            None => None,
        };

        Ok(Arc::new(Tracker {
            streams: Streams::new(config.flush_batch_size),
            stats: Stats::new(),
            buffers: BufferPool::default(),
            in_flight: AtomicUsize::new(0),
            in_flight_drained: Notify::new(),
            users,
            passkey2id,
            torrents,
            infohash2id,
            whitelist,
            pool,
            config,
            #[cfg(feature = "event_log")]
            event_log,
        }))
    }

    /// Drains every persistence stream until empty or `max_attempts` rounds
    /// have passed without success, mirroring the reference's shutdown
    /// flush loop.
    pub async fn drain_persistence(&self) {
        let max_rounds = 1000;
        let mut round = 0;

        while round < max_rounds && self.streams.are_any_not_empty() {
            self.streams.flush(&self.pool, self.config.max_flush_attempts).await;
            round += 1;
        }

        if round == max_rounds {
            tracing::warn!("graceful shutdown flush loop hit its round limit with data still queued");
        } else {
            tracing::info!("all persistence streams flushed");
        }
    }
}

async fn connect_to_database(database_url: &str) -> Result<sqlx::MySqlPool> {
    MySqlPoolOptions::new()
        .min_connections(0)
        .max_connections(10)
        .max_lifetime(std::time::Duration::from_secs(30 * 60))
        .idle_timeout(std::time::Duration::from_secs(10 * 60))
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(database_url)
        .await
        .context("failed connecting to the database")
}
