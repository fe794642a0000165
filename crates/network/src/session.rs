use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{Swarm, SwarmEvent};
use libp2p::{kad, mdns, Multiaddr, PeerId};
use libp2p_stream as stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error_span, info, trace, Instrument};

use dcmanager_types::{ContentId, DirectoryListing, PeerEndpoint};

use crate::behaviour::{self, Behaviour, Keypair, NetworkEvent};
use crate::codec::{self, ContentFramed, ObjectHeader};
use crate::{ContentObject, FetchError, FileStream, RequestError, PROTOCOL_NAME};

/// Largest directory listing a session accepts.
const MAX_LISTING_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Address the ephemeral host listens on
    pub listen_addr: Multiaddr,

    /// Discover peers on the local network
    pub enable_mdns: bool,

    /// Bound on dialing one bootstrap peer
    pub bootstrap_timeout: Duration,

    /// Bound on opening a request to one peer and reading its answer header,
    /// and on DHT queries
    pub request_timeout: Duration,

    pub idle_connection_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0"
                .parse()
                .unwrap_or_else(|_| Multiaddr::empty()),
            enable_mdns: true,
            bootstrap_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            idle_connection_timeout: Duration::from_secs(60),
        }
    }
}

type DialReply = oneshot::Sender<Result<(), String>>;

#[derive(Debug)]
enum CtrlMsg {
    Dial(PeerEndpoint, DialReply),
    FindProviders(ContentId, oneshot::Sender<Vec<PeerId>>),
    Discovered(oneshot::Sender<Vec<PeerId>>),
}

struct Shared {
    local_peer_id: PeerId,
    config: SessionConfig,
    control: stream::Control,
    tx_ctrl: mpsc::Sender<CtrlMsg>,
    task: JoinHandle<()>,
    bootstrapped: Mutex<Vec<PeerId>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.task.abort();
        debug!(peer = %self.local_peer_id, "Download session closed");
    }
}

/// Ephemeral peer-to-peer host used for one download.
///
/// Each session has a freshly generated identity and its own listener. It is
/// torn down when the last handle to it is dropped, which includes the
/// [`FileStream`]s it produced.
#[derive(Clone)]
pub struct DownloadSession {
    shared: Arc<Shared>,
}

impl DownloadSession {
    pub fn spawn(config: SessionConfig) -> Result<Self, FetchError> {
        let keypair = Keypair::generate_ed25519();

        let mut swarm = behaviour::build_swarm(
            keypair,
            kad::Mode::Client,
            config.enable_mdns,
            config.request_timeout,
            config.idle_connection_timeout,
        )
        .map_err(FetchError::session)?;

        swarm
            .listen_on(config.listen_addr.clone())
            .map_err(FetchError::session)?;

        let local_peer_id = *swarm.local_peer_id();
        let control = swarm.behaviour().stream.new_control();
        let (tx_ctrl, rx_ctrl) = mpsc::channel(32);

        let span = error_span!("session", peer = %local_peer_id);
        let task = tokio::spawn(run(swarm, rx_ctrl).instrument(span));

        debug!(peer = %local_peer_id, "Download session started");

        Ok(Self {
            shared: Arc::new(Shared {
                local_peer_id,
                config,
                control,
                tx_ctrl,
                task,
                bootstrapped: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.shared.local_peer_id
    }

    /// Peers successfully dialed by [`DownloadSession::bootstrap`], in order.
    pub fn bootstrapped(&self) -> Vec<PeerId> {
        self.shared
            .bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dials every peer concurrently, each under the bootstrap timeout, and
    /// returns how many are connected.
    pub async fn bootstrap(&self, peers: &[PeerEndpoint]) -> usize {
        let bound = self.shared.config.bootstrap_timeout;

        let dials = peers.iter().map(|endpoint| async move {
            let result = timeout(bound, self.dial(endpoint.clone())).await;
            (endpoint.peer_id, result)
        });

        let results = futures::future::join_all(dials).await;

        let mut bootstrapped = self
            .shared
            .bootstrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for (peer, result) in results {
            match result {
                Ok(Ok(())) => {
                    if !bootstrapped.contains(&peer) {
                        bootstrapped.push(peer);
                    }
                }
                Ok(Err(e)) => debug!(%peer, "Failed to dial bootstrap peer: {e}"),
                Err(_) => debug!(%peer, "Timed out dialing bootstrap peer"),
            }
        }

        bootstrapped.len()
    }

    /// Retrieves an object, trying the bootstrapped peers, then peers found on
    /// the local network, then providers found through the DHT.
    pub async fn fetch(&self, cid: &ContentId) -> Result<ContentObject, FetchError> {
        let mut tried = HashSet::new();

        let mut candidates = self.bootstrapped();
        candidates.extend(self.discovered().await?);

        for peer in candidates {
            if !tried.insert(peer) {
                continue;
            }

            match self.request(peer, cid).await {
                Ok(object) => return Ok(object),
                Err(e) => debug!(%peer, %cid, "Request failed: {e}"),
            }
        }

        debug!(%cid, "No known peer has the object, querying the DHT");

        for peer in self.find_providers(cid).await? {
            if !tried.insert(peer) {
                continue;
            }

            match self.request(peer, cid).await {
                Ok(object) => return Ok(object),
                Err(e) => debug!(%peer, %cid, "Request to provider failed: {e}"),
            }
        }

        Err(FetchError::Unavailable { cid: *cid })
    }

    async fn dial(&self, endpoint: PeerEndpoint) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();

        self.send(CtrlMsg::Dial(endpoint, reply))
            .await
            .map_err(|e| e.to_string())?;

        rx.await.map_err(|_| FetchError::SessionClosed.to_string())?
    }

    async fn discovered(&self) -> Result<Vec<PeerId>, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.send(CtrlMsg::Discovered(reply)).await?;
        rx.await.map_err(|_| FetchError::SessionClosed)
    }

    async fn find_providers(&self, cid: &ContentId) -> Result<Vec<PeerId>, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.send(CtrlMsg::FindProviders(*cid, reply)).await?;
        rx.await.map_err(|_| FetchError::SessionClosed)
    }

    async fn send(&self, msg: CtrlMsg) -> Result<(), FetchError> {
        self.shared
            .tx_ctrl
            .send(msg)
            .await
            .map_err(|_| FetchError::SessionClosed)
    }

    async fn request(&self, peer: PeerId, cid: &ContentId) -> Result<ContentObject, RequestError> {
        let bound = self.shared.config.request_timeout;

        let (header, mut framed) = timeout(bound, self.open(peer, cid))
            .await
            .map_err(|_| RequestError::Timeout)??;

        match header {
            ObjectHeader::NotFound => Err(RequestError::NotFound),

            ObjectHeader::File { size } => {
                debug!(%peer, %cid, size, "Peer serves file");

                Ok(ContentObject::File(FileStream::new(
                    *cid,
                    size,
                    peer,
                    framed,
                    self.clone(),
                )))
            }

            ObjectHeader::Directory => {
                let bytes = timeout(bound, codec::read_to_end(&mut framed, MAX_LISTING_SIZE))
                    .await
                    .map_err(|_| RequestError::Timeout)??;

                if ContentId::of(&bytes) != *cid {
                    return Err(RequestError::Mismatch);
                }

                let listing = DirectoryListing::decode(&bytes)
                    .map_err(|e| RequestError::Protocol(format!("invalid listing: {e}")))?;

                debug!(%peer, %cid, entries = listing.len(), "Peer serves directory");

                Ok(ContentObject::Directory(listing))
            }
        }
    }

    async fn open(
        &self,
        peer: PeerId,
        cid: &ContentId,
    ) -> Result<(ObjectHeader, ContentFramed), RequestError> {
        let mut control = self.shared.control.clone();

        let stream = control
            .open_stream(peer, PROTOCOL_NAME)
            .await
            .map_err(|e| RequestError::Open(e.to_string()))?;

        let mut framed = codec::framed(stream);
        codec::write_request(&mut framed, cid).await?;
        let header = codec::read_header(&mut framed).await?;

        Ok((header, framed))
    }
}

#[derive(Default)]
struct State {
    pending_dials: HashMap<PeerId, Vec<DialReply>>,
    provider_queries: HashMap<kad::QueryId, (Vec<PeerId>, oneshot::Sender<Vec<PeerId>>)>,
    discovered: Vec<PeerId>,
}

async fn run(mut swarm: Swarm<Behaviour>, mut rx_ctrl: mpsc::Receiver<CtrlMsg>) {
    let mut state = State::default();

    loop {
        let result = tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &mut swarm, &mut state)
            }

            Some(ctrl) = rx_ctrl.recv() => {
                handle_ctrl_msg(ctrl, &mut swarm, &mut state)
            }
        };

        match result {
            ControlFlow::Continue(()) => continue,
            ControlFlow::Break(()) => break,
        }
    }
}

fn handle_ctrl_msg(
    msg: CtrlMsg,
    swarm: &mut Swarm<Behaviour>,
    state: &mut State,
) -> ControlFlow<()> {
    match msg {
        CtrlMsg::Dial(endpoint, reply) => {
            let peer_id = endpoint.peer_id;

            if swarm.is_connected(&peer_id) {
                let _ = reply.send(Ok(()));
                return ControlFlow::Continue(());
            }

            for addr in &endpoint.addrs {
                swarm
                    .behaviour_mut()
                    .kad
                    .add_address(&peer_id, addr.clone());
            }

            if let Some(waiting) = state.pending_dials.get_mut(&peer_id) {
                waiting.push(reply);
                return ControlFlow::Continue(());
            }

            let opts = DialOpts::peer_id(peer_id)
                .addresses(endpoint.addrs)
                .extend_addresses_through_behaviour()
                .build();

            match swarm.dial(opts) {
                Ok(()) => state.pending_dials.entry(peer_id).or_default().push(reply),
                Err(e) => {
                    let _ = reply.send(Err(e.to_string()));
                }
            }
        }

        CtrlMsg::FindProviders(cid, reply) => {
            let key = kad::RecordKey::new(&cid.to_bytes());
            let query_id = swarm.behaviour_mut().kad.get_providers(key);
            state.provider_queries.insert(query_id, (Vec::new(), reply));
        }

        CtrlMsg::Discovered(reply) => {
            let _ = reply.send(state.discovered.clone());
        }
    }

    ControlFlow::Continue(())
}

fn handle_swarm_event(
    event: SwarmEvent<NetworkEvent>,
    swarm: &mut Swarm<Behaviour>,
    state: &mut State,
) -> ControlFlow<()> {
    match event {
        SwarmEvent::NewListenAddr { address, .. } => {
            trace!("Session is listening on {address}");
        }

        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            trace!(%peer_id, "Connected");

            for reply in state.pending_dials.remove(&peer_id).unwrap_or_default() {
                let _ = reply.send(Ok(()));
            }
        }

        SwarmEvent::OutgoingConnectionError {
            peer_id: Some(peer_id),
            error,
            ..
        } => {
            for reply in state.pending_dials.remove(&peer_id).unwrap_or_default() {
                let _ = reply.send(Err(error.to_string()));
            }
        }

        SwarmEvent::Behaviour(NetworkEvent::Identify(event)) => {
            behaviour::on_identify(swarm, *event);
        }

        SwarmEvent::Behaviour(NetworkEvent::Mdns(mdns::Event::Discovered(peers))) => {
            for (peer_id, addr) in peers {
                debug!(%peer_id, %addr, "Discovered peer on the local network");
                swarm.behaviour_mut().kad.add_address(&peer_id, addr);

                if !state.discovered.contains(&peer_id) {
                    state.discovered.push(peer_id);
                }
            }
        }

        SwarmEvent::Behaviour(NetworkEvent::Mdns(mdns::Event::Expired(peers))) => {
            for (peer_id, _addr) in peers {
                trace!(%peer_id, "Local peer expired");
                state.discovered.retain(|p| p != &peer_id);
            }
        }

        SwarmEvent::Behaviour(NetworkEvent::Kad(kad::Event::OutboundQueryProgressed {
            id,
            result: kad::QueryResult::GetProviders(result),
            step,
            ..
        })) => {
            on_providers(id, result, step.last, swarm, state);
        }

        _ => {}
    }

    ControlFlow::Continue(())
}

fn on_providers(
    id: kad::QueryId,
    result: kad::GetProvidersResult,
    last: bool,
    swarm: &mut Swarm<Behaviour>,
    state: &mut State,
) {
    let Some((found, _)) = state.provider_queries.get_mut(&id) else {
        return;
    };

    match result {
        Ok(kad::GetProvidersOk::FoundProviders { providers, .. }) => {
            for peer_id in providers {
                if peer_id == *swarm.local_peer_id() || found.contains(&peer_id) {
                    continue;
                }

                found.push(peer_id);

                // Dial while the query still holds the provider's addresses
                if !swarm.is_connected(&peer_id)
                    && !state.pending_dials.contains_key(&peer_id)
                    && swarm.dial(peer_id).is_ok()
                {
                    state.pending_dials.insert(peer_id, Vec::new());
                }
            }
        }

        Ok(kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => {}

        Err(e) => debug!("Provider query failed: {e}"),
    }

    if last {
        if let Some((found, reply)) = state.provider_queries.remove(&id) {
            info!(providers = found.len(), "Provider query finished");
            let _ = reply.send(found);
        }
    }
}
