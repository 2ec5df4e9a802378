pub mod ids;
pub mod peer;
pub mod torrent;
pub mod user;
pub mod whitelist;

pub use ids::{InfoHash, Passkey, PeerId};
pub use peer::{Peer, PeerKey, PeerTable};
pub use torrent::{InfoHash2Id, Torrent, TorrentMap, TorrentStatus};
pub use user::{Passkey2Id, User, UserMap};
pub use whitelist::ClientWhitelist;
