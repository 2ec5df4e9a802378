use indexmap::IndexMap;

use super::ids::Passkey;

pub struct User {
    pub id: u32,
    pub passkey: Passkey,
    pub uploaded: u64,
    pub downloaded: u64,
    pub is_disabled: bool,
    /// Maximum simultaneous active leeching slots, if the deployment
    /// enforces slots at all.
    pub slots: Option<u32>,
    /// Maximum number of distinct torrents a user may be active on at once.
    pub torrent_limit: Option<u32>,
    pub num_seeding: u32,
    pub num_leeching: u32,
}

#[derive(Default)]
pub struct UserMap(pub IndexMap<u32, User>);

impl std::ops::Deref for UserMap {
    type Target = IndexMap<u32, User>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for UserMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Default)]
pub struct Passkey2Id(pub IndexMap<Passkey, u32>);

impl std::ops::Deref for Passkey2Id {
    type Target = IndexMap<Passkey, u32>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Passkey2Id {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
