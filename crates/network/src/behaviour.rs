use std::time::Duration;

use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, kad, mdns, noise, tcp, yamux, Swarm, SwarmBuilder};
use libp2p_stream as stream;

pub use libp2p::identity::Keypair;
pub use libp2p::{Multiaddr, PeerId};

use crate::{BoxError, PROTOCOL_VERSION};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "NetworkEvent")]
pub struct Behaviour {
    pub identify: identify::Behaviour,
    pub kad: kad::Behaviour<kad::store::MemoryStore>,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub stream: stream::Behaviour,
}

impl Behaviour {
    pub fn new(
        keypair: &Keypair,
        mode: kad::Mode,
        enable_mdns: bool,
        query_timeout: Duration,
    ) -> Result<Self, BoxError> {
        let peer_id = keypair.public().to_peer_id();

        let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
        kad_config.set_query_timeout(query_timeout);

        let mut kad =
            kad::Behaviour::with_config(peer_id, kad::store::MemoryStore::new(peer_id), kad_config);
        kad.set_mode(Some(mode));

        let mdns = if enable_mdns {
            Some(mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)?)
        } else {
            None
        };

        Ok(Self {
            identify: identify::Behaviour::new(identify::Config::new(
                PROTOCOL_VERSION.to_string(),
                keypair.public(),
            )),
            kad,
            mdns: Toggle::from(mdns),
            stream: stream::Behaviour::new(),
        })
    }
}

#[derive(Debug)]
pub enum NetworkEvent {
    Identify(Box<identify::Event>),
    Kad(kad::Event),
    Mdns(mdns::Event),
    Stream,
}

impl From<identify::Event> for NetworkEvent {
    fn from(event: identify::Event) -> Self {
        Self::Identify(Box::new(event))
    }
}

impl From<kad::Event> for NetworkEvent {
    fn from(event: kad::Event) -> Self {
        Self::Kad(event)
    }
}

impl From<mdns::Event> for NetworkEvent {
    fn from(event: mdns::Event) -> Self {
        Self::Mdns(event)
    }
}

impl From<()> for NetworkEvent {
    fn from(_: ()) -> Self {
        Self::Stream
    }
}

/// Builds a TCP/noise/yamux swarm around [`Behaviour`].
pub fn build_swarm(
    keypair: Keypair,
    mode: kad::Mode,
    enable_mdns: bool,
    query_timeout: Duration,
    idle_connection_timeout: Duration,
) -> Result<Swarm<Behaviour>, BoxError> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|keypair| Behaviour::new(keypair, mode, enable_mdns, query_timeout))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_connection_timeout))
        .build();

    Ok(swarm)
}

/// Feeds the listen addresses a peer reports about itself into the DHT.
pub(crate) fn on_identify(swarm: &mut Swarm<Behaviour>, event: identify::Event) {
    if let identify::Event::Received { peer_id, info, .. } = event {
        tracing::trace!(%peer_id, agent = %info.agent_version, "Identified peer");

        for addr in info.listen_addrs {
            swarm.behaviour_mut().kad.add_address(&peer_id, addr);
        }
    }
}
