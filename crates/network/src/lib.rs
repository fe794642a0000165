//! Peer-to-peer retrieval of content objects.
//!
//! A [`ContentFetcher`] resolves who should hold an object through the
//! [`dcmanager_oracle::PeerResolver`], spawns a short-lived
//! [`DownloadSession`] with a fresh identity, bootstraps it against those
//! peers and asks them for the object over the `/dcnet/content/1.0.0`
//! protocol. A [`ContentServer`] answers that protocol from a
//! [`ContentStore`].

use libp2p::StreamProtocol;

mod behaviour;
mod error;
mod fetcher;
mod object;
mod server;
mod session;

pub mod codec;

pub use behaviour::{Keypair, Multiaddr, PeerId};
pub use error::{BoxError, FetchError, RequestError};
pub use fetcher::ContentFetcher;
pub use object::{ContentObject, FileStream};
pub use server::{ContentServer, ContentStore, MemoryStore, StoredObject};
pub use session::{DownloadSession, SessionConfig};

/// Protocol carrying content requests between peers.
pub const PROTOCOL_NAME: StreamProtocol = StreamProtocol::new("/dcnet/content/1.0.0");

/// Protocol version announced through identify.
const PROTOCOL_VERSION: &str = "/dcnet/1.0.0";
