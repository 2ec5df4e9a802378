use indexmap::IndexMap;

use crate::{
    error::AnnounceError,
    state::{InfoHash, PeerId},
    utils::{urlencoded_to_20_bytes, urlencoded_to_bytes},
};

/// A decoded query string: every key maps to its last-written value, with
/// two exceptions handled out of band because their values are raw 20-byte
/// identifiers, not text — running them through the lossy UTF-8 string path
/// used for everything else would corrupt any byte above 0x7F.
/// `info_hash` is additionally multi-valued (required by scrape) and kept in
/// arrival order.
#[derive(Default)]
pub struct ParsedQuery {
    pub info_hashes: Vec<InfoHash>,
    pub peer_id: Option<PeerId>,
    values: IndexMap<String, String>,
}

impl ParsedQuery {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Decodes a raw HTTP query string.
///
/// This intentionally does not use a general-purpose query-string crate:
/// the tracker must sustain thousands of these per second and the shape of
/// the input (flat key=value pairs, ASCII keys, mostly-ASCII values, one
/// multi-valued key) is narrow enough that a dedicated `memchr`-driven
/// scanner is both simpler to reason about and meaningfully faster.
///
/// Pairs are separated by `&` or `;`. Percent-decoding is applied to both
/// keys and values; a decode failure anywhere rejects the whole request.
pub fn parse(query_string: &str) -> Result<ParsedQuery, AnnounceError> {
    let mut parsed = ParsedQuery::default();

    if query_string.is_empty() {
        return Ok(parsed);
    }

    let bytes = query_string.as_bytes();
    let len = bytes.len();
    let mut pos = 0;
    let mut separators = memchr::memchr2_iter(b'&', b';', bytes);

    loop {
        let pair_end = separators.next().unwrap_or(len);
        let pair = &query_string[pos..pair_end];

        if !pair.is_empty() {
            let (raw_key, raw_value) = match memchr::memchr(b'=', pair.as_bytes()) {
                Some(eq_pos) => (&pair[..eq_pos], &pair[eq_pos + 1..]),
                None => (pair, ""),
            };

            let key = String::from_utf8(urlencoded_to_bytes(raw_key)?)
                .map_err(|_| AnnounceError::InvalidQueryStringKey)?;

            if key == "info_hash" {
                parsed.info_hashes.push(InfoHash::from(urlencoded_to_20_bytes(
                    raw_value,
                    AnnounceError::InvalidInfoHash,
                )?));
            } else if key == "peer_id" {
                parsed.peer_id = Some(PeerId::from(urlencoded_to_20_bytes(
                    raw_value,
                    AnnounceError::InvalidPeerId,
                )?));
            } else {
                let value = String::from_utf8_lossy(&urlencoded_to_bytes(raw_value)?).into_owned();
                parsed.values.insert(key, value);
            }
        }

        if pair_end == len {
            break;
        }

        pos = pair_end + 1;
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let parsed = parse("port=6881&uploaded=0&downloaded=0").unwrap();

        assert_eq!(parsed.get("port"), Some("6881"));
        assert_eq!(parsed.get("uploaded"), Some("0"));
        assert_eq!(parsed.get("downloaded"), Some("0"));
    }

    #[test]
    fn semicolon_is_also_a_separator() {
        let parsed = parse("port=6881;uploaded=0").unwrap();

        assert_eq!(parsed.get("port"), Some("6881"));
        assert_eq!(parsed.get("uploaded"), Some("0"));
    }

    #[test]
    fn last_write_wins_for_duplicate_single_valued_keys() {
        let parsed = parse("port=1&port=2").unwrap();

        assert_eq!(parsed.get("port"), Some("2"));
    }

    #[test]
    fn info_hash_is_multi_valued_and_ordered() {
        let hash_a = "a".repeat(20);
        let hash_b = "b".repeat(20);
        let query = format!("info_hash={hash_a}&info_hash={hash_b}");

        let parsed = parse(&query).unwrap();

        assert_eq!(parsed.info_hashes.len(), 2);
        assert_eq!(parsed.info_hashes[0], InfoHash::from([b'a'; 20]));
        assert_eq!(parsed.info_hashes[1], InfoHash::from([b'b'; 20]));
    }

    #[test]
    fn peer_id_is_kept_as_raw_bytes_not_lossy_utf8() {
        let mut raw = [0xFFu8; 20];
        raw[0] = b'-';
        let encoded: String = raw.iter().map(|b| format!("%{b:02X}")).collect();
        let query = format!("peer_id={encoded}");

        let parsed = parse(&query).unwrap();

        assert_eq!(parsed.peer_id, Some(PeerId::from(raw)));
    }

    #[test]
    fn percent_decodes_keys_and_values() {
        let parsed = parse("ke%79=val%75e").unwrap();

        assert_eq!(parsed.get("key"), Some("value"));
    }

    #[test]
    fn rejects_bad_percent_encoding() {
        assert!(parse("port=%zz").is_err());
    }

    #[test]
    fn empty_query_yields_no_pairs() {
        let parsed = parse("").unwrap();

        assert!(parsed.info_hashes.is_empty());
        assert_eq!(parsed.get("anything"), None);
    }
}
