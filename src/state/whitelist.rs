use indexmap::IndexSet;

/// Allowed client peer-id prefixes. When enabled in config, an announce from
/// a peer id that doesn't start with one of these prefixes is rejected
/// before any state is touched.
///
/// Structurally this mirrors the reference crate's user-agent blacklist
/// (same `RwLock`-guarded set, checked once up front) with the polarity and
/// key inverted to match the allow-list semantics this spec calls for.
#[derive(Default)]
pub struct ClientWhitelist(IndexSet<Vec<u8>>);

impl ClientWhitelist {
    pub fn new() -> Self {
        ClientWhitelist(IndexSet::new())
    }

    pub fn from_prefixes<I: IntoIterator<Item = Vec<u8>>>(prefixes: I) -> Self {
        ClientWhitelist(prefixes.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn allows(&self, peer_id: &[u8; 20]) -> bool {
        self.0.iter().any(|prefix| peer_id.starts_with(prefix))
    }

    pub fn insert(&mut self, prefix: Vec<u8>) {
        self.0.insert(prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_whitelist_allows_nothing_checked_by_caller() {
        let wl = ClientWhitelist::new();
        assert!(wl.is_empty());
    }

    #[test]
    fn matches_known_prefix() {
        let wl = ClientWhitelist::from_prefixes([b"-qB".to_vec()]);
        let mut peer_id = [0u8; 20];
        peer_id[..3].copy_from_slice(b"-qB");

        assert!(wl.allows(&peer_id));
    }

    #[test]
    fn rejects_unknown_prefix() {
        let wl = ClientWhitelist::from_prefixes([b"-qB".to_vec()]);
        let peer_id = [b'x'; 20];

        assert!(!wl.allows(&peer_id));
    }
}
