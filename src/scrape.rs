//! The `scrape` endpoint: swarm totals for one or more torrents in a single
//! request. Compiled in only when the `scrape` feature is enabled.

use crate::{query::ParsedQuery, tracker::Tracker};

/// Looks up every `info_hash` in `query` under the tracker's read locks and
/// writes a bencoded `d5:filesd...ee` dict with one entry per torrent the
/// tracker knows about. Unknown info hashes are silently omitted, per the
/// BitTorrent scrape convention, rather than causing the whole request to
/// fail.
pub fn handle(tracker: &Tracker, query: &ParsedQuery) -> Vec<u8> {
    let infohash2id = tracker.infohash2id.read();
    let torrents = tracker.torrents.read();

    let mut files = Vec::with_capacity(query.info_hashes.len());

    for info_hash in &query.info_hashes {
        let Some(torrent_id) = infohash2id.get(info_hash) else { continue };
        let Some(entry) = torrents.get(torrent_id) else { continue };

        let torrent = entry.lock();
        files.push((*info_hash, torrent.seeders, torrent.snatched, torrent.leechers));
    }

    drop(torrents);
    drop(infohash2id);

    let mut out = tracker.buffers.take();
    write_response(&mut out, &files);
    out
}

fn write_response(out: &mut Vec<u8>, files: &[(crate::state::InfoHash, u32, u32, u32)]) {
    out.extend(b"d5:filesd");

    for (info_hash, complete, downloaded, incomplete) in files {
        out.extend(b"20:");
        out.extend(info_hash.0);
        out.extend(b"d8:completei");
        out.extend(complete.to_string().as_bytes());
        out.extend(b"e10:downloadedi");
        out.extend(downloaded.to_string().as_bytes());
        out.extend(b"e10:incompletei");
        out.extend(incomplete.to_string().as_bytes());
        out.extend(b"ee");
    }

    out.extend(b"ee");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InfoHash;

    #[test]
    fn empty_file_list_is_well_formed() {
        let mut buf = Vec::new();
        write_response(&mut buf, &[]);

        assert_eq!(String::from_utf8(buf).unwrap(), "d5:filesdee");
    }

    #[test]
    fn one_file_matches_the_bittorrent_scrape_layout() {
        let info_hash = InfoHash([b'i'; 20]);
        let mut buf = Vec::new();
        write_response(&mut buf, &[(info_hash, 1, 2, 3)]);

        let text = String::from_utf8(buf).unwrap();
        let expected = format!(
            "d5:filesd20:{}d8:completei1e10:downloadedi2e10:incompletei3eeee",
            "i".repeat(20)
        );

        assert_eq!(text, expected);
    }

    #[test]
    fn multiple_files_are_concatenated_under_one_dict() {
        let a = InfoHash([b'a'; 20]);
        let b = InfoHash([b'b'; 20]);
        let mut buf = Vec::new();
        write_response(&mut buf, &[(a, 1, 0, 0), (b, 0, 0, 1)]);

        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("d5:filesd"));
        assert!(text.ends_with("ee"));
        assert!(text.contains(&"a".repeat(20)));
        assert!(text.contains(&"b".repeat(20)));
    }
}
