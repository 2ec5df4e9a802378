use std::{fmt, net::IpAddr, str::FromStr, sync::Arc};

use chrono::Utc;
use rand::{rngs::SmallRng, seq::IteratorRandom, Rng, SeedableRng};

use crate::{
    config::Config,
    error::AnnounceError,
    persistence::flush::{
        slot::SlotUpdate, snatch, snatch::SnatchUpdate, torrent::TorrentUpdate, user::UserUpdate,
    },
    query::{self, ParsedQuery},
    state::{Passkey, Peer, PeerKey, TorrentStatus},
    tracker::Tracker,
};

#[cfg(feature = "event_log")]
use crate::event_log::Event as LogEvent;
use crate::persistence::flush::transfer_history::TransferHistoryUpdate;

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Event {
    #[default]
    Empty,
    Started,
    Completed,
    Stopped,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, ""),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for Event {
    type Err = AnnounceError;

    fn from_str(event: &str) -> Result<Self, AnnounceError> {
        match event {
            "" | "empty" => Ok(Self::Empty),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(AnnounceError::UnsupportedEvent),
        }
    }
}

/// A fully parsed and validated announce request, independent of how the
/// query string reached us.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub peer_id: crate::state::PeerId,
    pub info_hash: crate::state::InfoHash,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Event,
    pub numwant: usize,
    pub compact: bool,
    pub no_peer_id: bool,
}

impl AnnounceRequest {
    pub fn from_query(query: &ParsedQuery, config: &Config) -> Result<Self, AnnounceError> {
        let info_hash = *query.info_hashes.first().ok_or(AnnounceError::MissingInfoHash)?;
        let peer_id = query.peer_id.ok_or(AnnounceError::MissingPeerId)?;

        let port = query
            .get("port")
            .ok_or(AnnounceError::MissingPort)?
            .parse()
            .map_err(|_| AnnounceError::InvalidPort)?;

        let uploaded = query
            .get("uploaded")
            .ok_or(AnnounceError::MissingUploaded)?
            .parse()
            .map_err(|_| AnnounceError::InvalidUploaded)?;

        let downloaded = query
            .get("downloaded")
            .ok_or(AnnounceError::MissingDownloaded)?
            .parse()
            .map_err(|_| AnnounceError::InvalidDownloaded)?;

        let left = query
            .get("left")
            .ok_or(AnnounceError::MissingLeft)?
            .parse()
            .map_err(|_| AnnounceError::InvalidLeft)?;

        let event = match query.get("event") {
            Some(raw) => raw.parse()?,
            None => Event::default(),
        };

        // Some clients send numwant=0 alongside a stopped event; the
        // reference forces it to zero either way since no peers are ever
        // returned for a stop.
        let numwant = if event == Event::Stopped {
            0
        } else {
            let requested = match query.get("numwant") {
                Some(raw) => raw.parse::<usize>().map_err(|_| AnnounceError::InvalidNumwant)?,
                None => config.numwant_default,
            };

            requested.min(config.numwant_max)
        };

        let compact = query.get("compact").map(|v| v != "0").unwrap_or(true);
        let no_peer_id = query.get("no_peer_id").map(|v| v == "1").unwrap_or(false);

        Ok(AnnounceRequest {
            peer_id,
            info_hash,
            port,
            uploaded,
            downloaded,
            left,
            event,
            numwant,
            compact,
            no_peer_id,
        })
    }
}

/// Rejects clients that look like browsers, bots, or otherwise aren't
/// plausible BitTorrent clients. Optional hardening gated by
/// `Config::client_validation_enabled`; spec.md never names this check, it
/// is kept from the reference as ambient abuse protection with no state
/// implications.
fn validate_client(user_agent: Option<&str>) -> Result<(), AnnounceError> {
    let user_agent = user_agent.ok_or(AnnounceError::ClientValidationFailed)?;

    if user_agent.is_empty() || user_agent.len() > 64 {
        return Err(AnnounceError::ClientValidationFailed);
    }

    let lower = user_agent.to_ascii_lowercase();
    let looks_like_a_browser = ["mozilla", "chrome", "safari", "applewebkit", "opera", "bot"]
        .iter()
        .any(|marker| lower.contains(marker));

    if looks_like_a_browser {
        return Err(AnnounceError::ClientValidationFailed);
    }

    Ok(())
}

/// Runs one announce end to end: validates the request, mutates swarm
/// state, queues the resulting persistence deltas, and returns the
/// bencoded response body. Never mutates state on an error return.
pub async fn handle(
    tracker: &Arc<Tracker>,
    passkey_raw: &str,
    query_string: &str,
    client_ip: IpAddr,
    user_agent: Option<&str>,
) -> Result<Vec<u8>, AnnounceError> {
    let parsed = query::parse(query_string)?;
    let request = AnnounceRequest::from_query(&parsed, &tracker.config)?;

    if tracker.config.client_validation_enabled {
        validate_client(user_agent)?;
    }

    if tracker.config.whitelist_enabled && !tracker.whitelist.read().allows(&request.peer_id) {
        return Err(AnnounceError::ClientNotWhitelisted);
    }

    let passkey = Passkey::from_str(passkey_raw).map_err(|_| AnnounceError::InvalidPasskey)?;

    let user_id = *tracker
        .passkey2id
        .read()
        .get(&passkey)
        .ok_or(AnnounceError::PasskeyNotFound)?;

    let (user_is_disabled, user_slots, user_num_leeching) = {
        let users = tracker.users.read();
        let user = users.get(&user_id).ok_or(AnnounceError::UserNotFound)?;
        (user.is_disabled, user.slots, user.num_leeching)
    };

    // An authorization failure, per spec: a disabled account can't use the
    // tracker at all, not just lose credit.
    if user_is_disabled {
        return Err(AnnounceError::UserDisabled);
    }

    let torrent_id = *tracker
        .infohash2id
        .read()
        .get(&request.info_hash)
        .ok_or(AnnounceError::TorrentNotFound)?;

    let torrent_entry = tracker
        .torrents
        .read()
        .get(&torrent_id)
        .ok_or(AnnounceError::TorrentNotFound)?
        .clone();

    let mut torrent = torrent_entry.lock();

    if torrent.status == TorrentStatus::Deleted {
        return Err(AnnounceError::TorrentIsDeleted);
    }

    let credit_eligible = torrent.status == TorrentStatus::Active;
    let key = PeerKey { user_id, peer_id: request.peer_id };
    let now = Utc::now();

    let leech_policy_rejects = tracker.config.slot_enforcement_enabled
        && request.left > 0
        && matches!(user_slots, Some(slots) if user_num_leeching >= slots);

    let uploaded_delta;
    let downloaded_delta;
    let seeder_delta;
    let leecher_delta;
    let just_completed;

    if request.event == Event::Stopped {
        match torrent.peers.shift_remove(&key) {
            Some(peer) => {
                uploaded_delta = if credit_eligible {
                    request.uploaded.saturating_sub(peer.uploaded)
                } else {
                    0
                };
                downloaded_delta = if credit_eligible && !leech_policy_rejects {
                    request.downloaded.saturating_sub(peer.downloaded)
                } else {
                    0
                };
                seeder_delta = -(peer.is_included_in_seed_list() as i32);
                leecher_delta = -(peer.is_included_in_leech_list() as i32);
                just_completed = false;
            }
            None => return Err(AnnounceError::StoppedPeerDoesntExist),
        }
    } else {
        let existing = torrent.peers.get(&key).copied();
        let session_reset = existing.is_some() && request.event == Event::Started;

        (uploaded_delta, downloaded_delta) = match existing {
            Some(_) if session_reset => (0, 0),
            Some(old) if request.uploaded < old.uploaded || request.downloaded < old.downloaded => {
                // Client reports totals lower than what we last saw: assume
                // it restarted the session under the same peer id.
                (0, 0)
            }
            Some(old) => (
                if credit_eligible { request.uploaded - old.uploaded } else { 0 },
                if credit_eligible && !leech_policy_rejects {
                    request.downloaded - old.downloaded
                } else {
                    0
                },
            ),
            None => (0, 0),
        };

        let started_at = match existing {
            Some(old) if !session_reset => old.started_at,
            _ => now,
        };

        let already_completed = existing.is_some_and(|p| p.has_completed);
        just_completed = request.event == Event::Completed && !already_completed;

        let new_peer = Peer {
            ip_address: client_ip,
            port: request.port,
            uploaded: request.uploaded,
            downloaded: request.downloaded,
            left: request.left,
            is_seeder: request.left == 0,
            is_active: true,
            updated_at: now,
            started_at,
            has_completed: already_completed || just_completed,
        };

        torrent.peers.insert(key, new_peer);

        (seeder_delta, leecher_delta) = match existing {
            Some(old) => (
                new_peer.is_included_in_seed_list() as i32 - old.is_included_in_seed_list() as i32,
                new_peer.is_included_in_leech_list() as i32 - old.is_included_in_leech_list() as i32,
            ),
            None => (
                new_peer.is_included_in_seed_list() as i32,
                new_peer.is_included_in_leech_list() as i32,
            ),
        };
    }

    // Has to happen before the peer list is generated.
    torrent.seeders = torrent.seeders.saturating_add_signed(seeder_delta);
    torrent.leechers = torrent.leechers.saturating_add_signed(leecher_delta);

    if just_completed {
        torrent.snatched = torrent.snatched.saturating_add(1);
    }

    let complete = torrent.seeders;
    let incomplete = torrent.leechers;

    let mut peers_ipv4: Vec<u8> = Vec::new();
    let mut peers_ipv6: Vec<u8> = Vec::new();
    let mut peer_dicts: Vec<Vec<u8>> = Vec::new();

    if request.numwant > 0 {
        let wants_seeders = request.left > 0;
        let mut rng = SmallRng::from_entropy();

        let mut chosen: Vec<(&PeerKey, &Peer)> = torrent
            .peers
            .iter()
            .filter(|(k, p)| **k != key && p.is_included_in_peer_list() && p.is_seeder == wants_seeders)
            .choose_multiple(&mut rng, request.numwant);

        if chosen.len() < request.numwant {
            let remaining = request.numwant - chosen.len();
            chosen.extend(
                torrent
                    .peers
                    .iter()
                    .filter(|(k, p)| {
                        **k != key && p.is_included_in_peer_list() && p.is_seeder != wants_seeders
                    })
                    .choose_multiple(&mut rng, remaining),
            );
        }

        for (peer_key, peer) in chosen.iter().copied() {
            if request.compact {
                match peer.ip_address {
                    IpAddr::V4(ip) => {
                        peers_ipv4.extend(ip.octets());
                        peers_ipv4.extend(peer.port.to_be_bytes());
                    }
                    IpAddr::V6(ip) => {
                        peers_ipv6.extend(ip.octets());
                        peers_ipv6.extend(peer.port.to_be_bytes());
                    }
                }
            } else {
                peer_dicts.push(encode_peer_dict(peer_key, peer, request.no_peer_id));
            }
        }
    }

    drop(torrent);

    if seeder_delta != 0 || leecher_delta != 0 || just_completed {
        tracker.streams.torrents.lock().upsert(
            torrent_id,
            TorrentUpdate {
                torrent_id,
                seeder_delta,
                leecher_delta,
                snatch_delta: just_completed as u32,
            },
        );
    }

    if uploaded_delta != 0 || downloaded_delta != 0 {
        tracker.streams.users.lock().upsert(
            user_id,
            UserUpdate { user_id, uploaded_delta, downloaded_delta },
        );

        tracker.users.write().entry(user_id).and_modify(|user| {
            user.uploaded = user.uploaded.saturating_add(uploaded_delta);
            user.downloaded = user.downloaded.saturating_add(downloaded_delta);
        });
    }

    if just_completed {
        tracker.streams.snatches.lock().upsert(
            snatch::next_sequence(),
            SnatchUpdate { user_id, torrent_id, snatched_at: now },
        );

        #[cfg(feature = "event_log")]
        if let Some(log) = &tracker.event_log {
            log.record(&LogEvent::Snatch { user_id, torrent_id, at: now });
        }
    }

    if tracker.config.extended_accounting_enabled && (uploaded_delta != 0 || downloaded_delta != 0) {
        tracker.streams.transfer_history.lock().upsert(
            snatch::next_sequence(),
            TransferHistoryUpdate { user_id, torrent_id, uploaded_delta, downloaded_delta, recorded_at: now },
        );

        #[cfg(feature = "event_log")]
        if let Some(log) = &tracker.event_log {
            log.record(&LogEvent::Transfer {
                user_id,
                torrent_id,
                uploaded_delta,
                downloaded_delta,
                at: now,
                agent: user_agent,
            });
        }
    }

    if seeder_delta != 0 || leecher_delta != 0 {
        tracker.users.write().entry(user_id).and_modify(|user| {
            user.num_seeding = user.num_seeding.saturating_add_signed(seeder_delta);
            user.num_leeching = user.num_leeching.saturating_add_signed(leecher_delta);
        });
    }

    if tracker.config.slot_enforcement_enabled {
        let active_leech_count = tracker.users.read().get(&user_id).map_or(0, |u| u.num_leeching);

        tracker
            .streams
            .slots
            .lock()
            .upsert(user_id, SlotUpdate { user_id, active_leech_count });
    }

    let interval = SmallRng::from_entropy().gen_range(tracker.config.announce_min..=tracker.config.announce_max);
    let mut response = tracker.buffers.take();

    write_response(
        &mut response,
        complete,
        incomplete,
        interval,
        tracker.config.announce_min,
        request.compact,
        &peers_ipv4,
        &peers_ipv6,
        &peer_dicts,
    );

    Ok(response)
}

/// Writes the sorted-keys bencoded announce response directly into `out`.
#[allow(clippy::too_many_arguments)]
fn write_response(
    out: &mut Vec<u8>,
    complete: u32,
    incomplete: u32,
    interval: u32,
    min_interval: u32,
    compact: bool,
    peers_ipv4: &[u8],
    peers_ipv6: &[u8],
    peer_dicts: &[Vec<u8>],
) {
    out.extend(b"d8:completei");
    out.extend(complete.to_string().as_bytes());
    out.extend(b"e10:incompletei");
    out.extend(incomplete.to_string().as_bytes());
    out.extend(b"e8:intervali");
    out.extend(interval.to_string().as_bytes());
    out.extend(b"e12:min intervali");
    out.extend(min_interval.to_string().as_bytes());
    out.extend(b"e5:peers");

    if compact {
        out.extend(peers_ipv4.len().to_string().as_bytes());
        out.extend(b":");
        out.extend(peers_ipv4);

        if !peers_ipv6.is_empty() {
            out.extend(b"6:peers6");
            out.extend(peers_ipv6.len().to_string().as_bytes());
            out.extend(b":");
            out.extend(peers_ipv6);
        }
    } else {
        out.extend(b"l");
        for dict in peer_dicts {
            out.extend(dict);
        }
        out.extend(b"e");
    }

    out.extend(b"e");
}

/// One peer entry in the non-compact `peers` list: `d[ip][peer id][port]e`,
/// keys sorted.
fn encode_peer_dict(key: &PeerKey, peer: &Peer, no_peer_id: bool) -> Vec<u8> {
    let ip = peer.ip_address.to_string();
    let mut out = Vec::with_capacity(64);

    out.extend(b"d2:ip");
    out.extend(ip.len().to_string().as_bytes());
    out.extend(b":");
    out.extend(ip.as_bytes());

    if !no_peer_id {
        out.extend(b"7:peer id20:");
        out.extend(key.peer_id.0);
    }

    out.extend(b"4:porti");
    out.extend(peer.port.to_string().as_bytes());
    out.extend(b"ee");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InfoHash, PeerId};

    fn make_config() -> Config {
        Config {
            listening_ip_address: "0.0.0.0".parse().unwrap(),
            listening_port: 4227,
            database_url: String::new(),
            announce_min: 3600,
            announce_max: 3600,
            numwant_default: 50,
            numwant_max: 50,
            flush_interval: 3,
            reload_interval: 60,
            peer_expiry_interval: 1800,
            active_peer_ttl: 7200,
            inactive_peer_ttl: 1_814_400,
            flush_batch_size: 4000,
            max_flush_attempts: 5,
            whitelist_enabled: false,
            slot_enforcement_enabled: false,
            extended_accounting_enabled: false,
            client_validation_enabled: false,
            event_log_path: None,
        }
    }

    fn sample_query() -> String {
        let info_hash: String = (0..20).map(|_| "%41").collect();
        let peer_id: String = (0..20).map(|_| "%42").collect();
        format!("info_hash={info_hash}&peer_id={peer_id}&port=6881&uploaded=0&downloaded=0&left=100")
    }

    #[test]
    fn parses_minimal_valid_request() {
        let config = make_config();
        let parsed = query::parse(&sample_query()).unwrap();
        let request = AnnounceRequest::from_query(&parsed, &config).unwrap();

        assert_eq!(request.info_hash, InfoHash::from([b'A'; 20]));
        assert_eq!(request.peer_id, PeerId::from([b'B'; 20]));
        assert_eq!(request.port, 6881);
        assert_eq!(request.left, 100);
        assert_eq!(request.event, Event::Empty);
        assert!(request.compact);
    }

    #[test]
    fn missing_info_hash_is_rejected() {
        let config = make_config();
        let parsed = query::parse("peer_id=%42&port=1&uploaded=0&downloaded=0&left=0").unwrap();

        assert_eq!(
            AnnounceRequest::from_query(&parsed, &config).unwrap_err(),
            AnnounceError::MissingInfoHash
        );
    }

    #[test]
    fn stopped_event_forces_numwant_to_zero() {
        let config = make_config();
        let query = format!("{}&event=stopped&numwant=50", sample_query());
        let parsed = query::parse(&query).unwrap();
        let request = AnnounceRequest::from_query(&parsed, &config).unwrap();

        assert_eq!(request.numwant, 0);
    }

    #[test]
    fn numwant_is_clamped_to_configured_max() {
        let config = make_config();
        let query = format!("{}&numwant=9999", sample_query());
        let parsed = query::parse(&query).unwrap();
        let request = AnnounceRequest::from_query(&parsed, &config).unwrap();

        assert_eq!(request.numwant, config.numwant_max);
    }

    #[test]
    fn compact_zero_is_honored() {
        let config = make_config();
        let query = format!("{}&compact=0", sample_query());
        let parsed = query::parse(&query).unwrap();
        let request = AnnounceRequest::from_query(&parsed, &config).unwrap();

        assert!(!request.compact);
    }

    #[test]
    fn unsupported_event_is_rejected() {
        let config = make_config();
        let query = format!("{}&event=bogus", sample_query());
        let parsed = query::parse(&query).unwrap();

        assert_eq!(
            AnnounceRequest::from_query(&parsed, &config).unwrap_err(),
            AnnounceError::UnsupportedEvent
        );
    }

    #[test]
    fn response_with_no_peers_is_well_formed() {
        let mut buf = Vec::new();
        write_response(&mut buf, 1, 0, 3600, 3600, true, &[], &[], &[]);

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "d8:completei1e10:incompletei0e8:intervali3600e12:min intervali3600e5:peers0:e"
        );
    }

    #[test]
    fn non_compact_response_wraps_peer_dicts_in_a_list() {
        let key = PeerKey { user_id: 1, peer_id: PeerId::from([b'C'; 20]) };
        let peer = Peer {
            ip_address: "127.0.0.1".parse().unwrap(),
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            is_seeder: true,
            is_active: true,
            updated_at: Utc::now(),
            started_at: Utc::now(),
            has_completed: false,
        };
        let dict = encode_peer_dict(&key, &peer, false);

        let mut buf = Vec::new();
        write_response(&mut buf, 1, 0, 3600, 3600, false, &[], &[], &[dict]);

        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("5:peersl"));
        assert!(text.contains("7:peer id20:"));
        assert!(text.ends_with("ee"));
    }
}
