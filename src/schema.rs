//! Reference schema for the relational store this tracker reads from and
//! writes to. Not executed by this crate (no migration runner is included,
//! matching the reference, which also expects the schema to already exist);
//! kept here as documentation of the column names `persistence::reload` and
//! `persistence::flush::*` assume.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
    passkey CHAR(32) NOT NULL UNIQUE,
    uploaded BIGINT UNSIGNED NOT NULL DEFAULT 0,
    downloaded BIGINT UNSIGNED NOT NULL DEFAULT 0,
    is_disabled BOOLEAN NOT NULL DEFAULT FALSE,
    slots INT UNSIGNED NULL,
    torrent_limit INT UNSIGNED NULL,
    active_leech_count INT UNSIGNED NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS torrents (
    id BIGINT UNSIGNED NOT NULL PRIMARY KEY,
    info_hash CHAR(40) NOT NULL UNIQUE,
    status SMALLINT NOT NULL DEFAULT 0,
    seeders INT UNSIGNED NOT NULL DEFAULT 0,
    leechers INT UNSIGNED NOT NULL DEFAULT 0,
    snatched INT UNSIGNED NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS snatches (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    user_id BIGINT UNSIGNED NOT NULL,
    torrent_id BIGINT UNSIGNED NOT NULL,
    snatched_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS transfer_history (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    user_id BIGINT UNSIGNED NOT NULL,
    torrent_id BIGINT UNSIGNED NOT NULL,
    uploaded BIGINT UNSIGNED NOT NULL,
    downloaded BIGINT UNSIGNED NOT NULL,
    recorded_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS whitelisted_clients (
    peer_id_prefix VARCHAR(16) NOT NULL PRIMARY KEY
);
"#;
