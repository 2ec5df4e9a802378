use std::{net::IpAddr, time::Duration};

use anyhow::{Context, Result};

/// Tunables loaded from the environment (via a `.env` file and/or real
/// environment variables). Every field here corresponds to one of the
/// tunables spec.md §6 names; parsing follows the reference crate's own
/// idiom of hand-parsing `env::var` with a descriptive `.context(..)`
/// message rather than pulling in a config-file crate.
#[derive(Clone)]
pub struct Config {
    pub listening_ip_address: IpAddr,
    pub listening_port: u16,
    pub database_url: String,

    /// Lower bound of the randomised `interval` returned to clients.
    pub announce_min: u32,
    /// Upper bound of the randomised `interval` returned to clients.
    pub announce_max: u32,

    pub numwant_default: usize,
    pub numwant_max: usize,

    /// Seconds between scheduled flushes of queued deltas to the database.
    pub flush_interval: u64,
    /// Seconds between full reloads of the canonical user/torrent snapshot.
    pub reload_interval: u64,
    /// Seconds between reaper sweeps.
    pub peer_expiry_interval: u64,
    /// Seconds of inactivity before a peer is marked inactive (withheld from
    /// peer lists but not yet evicted).
    pub active_peer_ttl: u64,
    /// Seconds of inactivity before an inactive peer is evicted outright.
    pub inactive_peer_ttl: u64,

    /// Number of queued records that triggers an early flush of a stream,
    /// independent of the timer.
    pub flush_batch_size: usize,
    /// Number of consecutive failed flush attempts before a batch is
    /// dropped and logged rather than retried forever.
    pub max_flush_attempts: u8,

    pub whitelist_enabled: bool,
    pub slot_enforcement_enabled: bool,
    pub extended_accounting_enabled: bool,
    pub client_validation_enabled: bool,

    pub event_log_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            listening_ip_address: env_or("LISTENING_IP_ADDRESS", "0.0.0.0")?,
            listening_port: env_or("LISTENING_PORT", "4227")?,
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL not found in environment")?,

            announce_min: env_or("ANNOUNCE_MIN", "3600")?,
            announce_max: env_or("ANNOUNCE_MAX", "5400")?,

            numwant_default: env_or("NUMWANT_DEFAULT", "50")?,
            numwant_max: env_or("NUMWANT_MAX", "50")?,

            flush_interval: env_or("FLUSH_INTERVAL", "3")?,
            reload_interval: env_or("RELOAD_INTERVAL", "60")?,
            peer_expiry_interval: env_or("PEER_EXPIRY_INTERVAL", "1800")?,
            active_peer_ttl: env_or("ACTIVE_PEER_TTL", "7200")?,
            inactive_peer_ttl: env_or("INACTIVE_PEER_TTL", "1814400")?,

            flush_batch_size: env_or("FLUSH_BATCH_SIZE", "4000")?,
            max_flush_attempts: env_or("MAX_FLUSH_ATTEMPTS", "5")?,

            whitelist_enabled: env_or("WHITELIST_ENABLED", "false")?,
            slot_enforcement_enabled: env_or("SLOT_ENFORCEMENT_ENABLED", "false")?,
            extended_accounting_enabled: env_or("EXTENDED_ACCOUNTING_ENABLED", "false")?,
            client_validation_enabled: env_or("CLIENT_VALIDATION_ENABLED", "true")?,

            event_log_path: std::env::var("EVENT_LOG_PATH").ok(),
        })
    }

    pub fn active_peer_ttl(&self) -> Duration {
        Duration::from_secs(self.active_peer_ttl)
    }

    pub fn inactive_peer_ttl(&self) -> Duration {
        Duration::from_secs(self.inactive_peer_ttl)
    }
}

/// Reads an environment variable, falling back to `default` when unset, and
/// parses it via `FromStr`. The default is parsed the same way so a typo in
/// the default itself fails loudly in tests rather than silently at 2am.
fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());

    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("failed to parse {key}={raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        std::env::remove_var("PRIVATEER_TEST_KEY_ABSENT");
        let value: u32 = env_or("PRIVATEER_TEST_KEY_ABSENT", "42").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn env_or_rejects_unparsable_value() {
        std::env::set_var("PRIVATEER_TEST_KEY_BAD", "not-a-number");
        let result: Result<u32> = env_or("PRIVATEER_TEST_KEY_BAD", "1");
        std::env::remove_var("PRIVATEER_TEST_KEY_BAD");
        assert!(result.is_err());
    }
}
