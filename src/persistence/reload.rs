use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use sqlx::{MySqlPool, Row};

use crate::state::{
    torrent::{InfoHash2Id, Torrent, TorrentMap, TorrentStatus},
    user::{Passkey2Id, User, UserMap},
    ClientWhitelist, InfoHash, Passkey,
};

/// Replaces the whitelisted client peer-id prefixes in place. A no-op table
/// read returning zero rows yields an empty whitelist, which is
/// indistinguishable from "whitelisting disabled" at the call site — the
/// caller is expected to gate enforcement on `Config::whitelist_enabled`
/// separately.
pub async fn reload_whitelist(pool: &MySqlPool, whitelist: &RwLock<ClientWhitelist>) -> Result<()> {
    let rows = sqlx::query("SELECT peer_id_prefix FROM whitelisted_clients")
        .fetch_all(pool)
        .await
        .context("failed reloading client whitelist from database")?;

    let mut new_whitelist = ClientWhitelist::new();

    for row in &rows {
        let prefix: String = row.try_get("peer_id_prefix")?;
        new_whitelist.insert(prefix.into_bytes());
    }

    *whitelist.write() = new_whitelist;

    Ok(())
}

/// Replaces the whole user snapshot in place. Derived counters
/// (`num_seeding`/`num_leeching`) are not persisted, so they're carried over
/// from the outgoing record rather than reset to zero.
pub async fn reload_users(
    pool: &MySqlPool,
    users: &RwLock<UserMap>,
    passkey2id: &RwLock<Passkey2Id>,
) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, passkey, uploaded, downloaded, is_disabled, slots, torrent_limit FROM users",
    )
    .fetch_all(pool)
    .await
    .context("failed reloading users from database")?;

    let mut new_users = IndexMap::with_capacity(rows.len());
    let mut new_passkey2id = IndexMap::with_capacity(rows.len());

    {
        let old_users = users.read();

        for row in &rows {
            let id: u32 = row.try_get("id")?;
            let passkey_raw: String = row.try_get("passkey")?;
            let passkey = Passkey::from_str(&passkey_raw)
                .map_err(|e| anyhow::anyhow!("invalid passkey for user {id}: {e}"))?;

            let (num_seeding, num_leeching) = old_users
                .get(&id)
                .map(|user| (user.num_seeding, user.num_leeching))
                .unwrap_or_default();

            new_passkey2id.insert(passkey, id);
            new_users.insert(
                id,
                User {
                    id,
                    passkey,
                    uploaded: row.try_get("uploaded")?,
                    downloaded: row.try_get("downloaded")?,
                    is_disabled: row.try_get("is_disabled")?,
                    slots: row.try_get::<Option<u32>, _>("slots")?,
                    torrent_limit: row.try_get::<Option<u32>, _>("torrent_limit")?,
                    num_seeding,
                    num_leeching,
                },
            );
        }
    }

    *users.write() = UserMap(new_users);
    *passkey2id.write() = Passkey2Id(new_passkey2id);

    Ok(())
}

/// Replaces the whole torrent snapshot in place. Each torrent's live `peers`
/// table is carried over onto the refreshed record instead of being reset,
/// since peers are transient session state, not part of the canonical
/// snapshot; `seeders`/`leechers` are then recomputed from the carried-over
/// peer table rather than trusted from disk.
pub async fn reload_torrents(
    pool: &MySqlPool,
    torrents: &RwLock<TorrentMap>,
    infohash2id: &RwLock<InfoHash2Id>,
) -> Result<()> {
    let rows = sqlx::query("SELECT id, info_hash, status, snatched FROM torrents")
        .fetch_all(pool)
        .await
        .context("failed reloading torrents from database")?;

    let mut new_torrents = IndexMap::with_capacity(rows.len());
    let mut new_infohash2id = IndexMap::with_capacity(rows.len());

    {
        let old_torrents = torrents.read();

        for row in &rows {
            let id: u32 = row.try_get("id")?;
            let info_hash_raw: String = row.try_get("info_hash")?;
            let info_hash = InfoHash::from_str(&info_hash_raw)
                .map_err(|e| anyhow::anyhow!("invalid info_hash for torrent {id}: {e}"))?;
            let status = TorrentStatus::from_i16(row.try_get("status")?);
            let snatched: u32 = row.try_get("snatched")?;

            let peers = old_torrents
                .get(&id)
                .map(|existing| existing.lock().peers.clone())
                .unwrap_or_default();

            let mut torrent = Torrent::new(id, info_hash, status);
            torrent.snatched = snatched;
            torrent.seeders = peers
                .values()
                .filter(|peer| peer.is_included_in_seed_list())
                .count() as u32;
            torrent.leechers = peers
                .values()
                .filter(|peer| peer.is_included_in_leech_list())
                .count() as u32;
            torrent.peers = peers;

            new_infohash2id.insert(info_hash, id);
            new_torrents.insert(id, Arc::new(Mutex::new(torrent)));
        }
    }

    *torrents.write() = TorrentMap(new_torrents);
    *infohash2id.write() = InfoHash2Id(new_infohash2id);

    Ok(())
}
