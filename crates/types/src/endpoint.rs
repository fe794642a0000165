use core::fmt;
use core::str::FromStr;

use libp2p_identity::PeerId;
use multiaddr::{Multiaddr, Protocol};
use thiserror::Error;

/// A reachable peer: its identity and the addresses it can be dialed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseEndpointError {
    #[error("invalid multiaddr: {0}")]
    Multiaddr(String),

    #[error("multiaddr {0} does not end with a /p2p/<peer id> component")]
    MissingPeerId(String),
}

impl PeerEndpoint {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }

    /// Parses a full address such as `/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo…`.
    pub fn from_multiaddr(mut addr: Multiaddr) -> Result<Self, ParseEndpointError> {
        match addr.pop() {
            Some(Protocol::P2p(peer_id)) => {
                let addrs = if addr.is_empty() { vec![] } else { vec![addr] };
                Ok(Self { peer_id, addrs })
            }
            _ => Err(ParseEndpointError::MissingPeerId(addr.to_string())),
        }
    }

    /// Addresses with the `/p2p/<peer id>` suffix appended.
    pub fn full_addrs(&self) -> impl Iterator<Item = Multiaddr> + '_ {
        self.addrs
            .iter()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
    }

    /// Adds the other endpoint's addresses when both name the same peer.
    pub fn merge(&mut self, other: &PeerEndpoint) -> bool {
        if self.peer_id != other.peer_id {
            return false;
        }

        for addr in &other.addrs {
            if !self.addrs.contains(addr) {
                self.addrs.push(addr.clone());
            }
        }

        true
    }
}

impl FromStr for PeerEndpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = s
            .trim()
            .parse::<Multiaddr>()
            .map_err(|e| ParseEndpointError::Multiaddr(e.to_string()))?;

        Self::from_multiaddr(addr)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addrs.first() {
            Some(addr) => write!(f, "{addr}/p2p/{}", self.peer_id),
            None => write!(f, "/p2p/{}", self.peer_id),
        }
    }
}
