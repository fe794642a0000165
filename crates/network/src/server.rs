use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use libp2p::swarm::{Swarm, SwarmEvent};
use libp2p::{kad, Multiaddr, PeerId, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error_span, info, trace, warn, Instrument};

use dcmanager_types::{ContentId, DirectoryListing, PeerEndpoint};

use crate::behaviour::{self, Behaviour, Keypair, NetworkEvent};
use crate::codec::{self, ObjectHeader};
use crate::{FetchError, RequestError, PROTOCOL_NAME};

/// An object as a storage peer holds it.
#[derive(Clone, Debug)]
pub enum StoredObject {
    File(Bytes),
    Directory(DirectoryListing),
}

/// Lookup of locally held objects by identifier.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    async fn get(&self, cid: &ContentId) -> Option<StoredObject>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ContentId, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores file bytes under their identifier and returns it.
    pub fn insert_file(&self, bytes: impl Into<Bytes>) -> ContentId {
        let bytes = bytes.into();
        let cid = ContentId::of(&bytes);
        self.insert(cid, StoredObject::File(bytes));
        cid
    }

    pub fn insert_directory(&self, listing: DirectoryListing) -> ContentId {
        let cid = listing.content_id();
        self.insert(cid, StoredObject::Directory(listing));
        cid
    }

    /// Stores an object under an arbitrary identifier.
    pub fn insert(&self, cid: ContentId, object: StoredObject) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cid, object);
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, cid: &ContentId) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned()
    }
}

#[derive(Debug)]
enum CtrlMsg {
    Provide(ContentId),
    AddPeer(PeerEndpoint),
    Shutdown,
}

/// Serving side of the content protocol.
pub struct ContentServer {
    peer_id: PeerId,
    listen_addrs: Vec<Multiaddr>,
    tx_ctrl: mpsc::Sender<CtrlMsg>,
    swarm_task: JoinHandle<()>,
    accept_task: JoinHandle<()>,
}

impl ContentServer {
    /// Starts a host listening on `listen_addr` and returns once it has bound
    /// its first address.
    pub async fn spawn(
        keypair: Keypair,
        listen_addr: Multiaddr,
        store: Arc<dyn ContentStore>,
    ) -> Result<Self, FetchError> {
        let mut swarm = behaviour::build_swarm(
            keypair,
            kad::Mode::Server,
            false,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .map_err(FetchError::session)?;

        swarm.listen_on(listen_addr).map_err(FetchError::session)?;

        let listen_addr = loop {
            match swarm.select_next_some().await {
                SwarmEvent::NewListenAddr { address, .. } => break address,
                SwarmEvent::ListenerError { error, .. } => {
                    return Err(FetchError::session(error));
                }
                _ => {}
            }
        };

        let peer_id = *swarm.local_peer_id();

        let incoming = swarm
            .behaviour()
            .stream
            .new_control()
            .accept(PROTOCOL_NAME)
            .map_err(FetchError::session)?;

        let span = error_span!("server", peer = %peer_id);

        let accept_task = tokio::spawn(
            incoming
                .for_each_concurrent(None, move |(peer, stream)| {
                    serve_request(peer, stream, Arc::clone(&store))
                })
                .instrument(span.clone()),
        );

        let (tx_ctrl, rx_ctrl) = mpsc::channel(32);
        let swarm_task = tokio::spawn(run(swarm, rx_ctrl).instrument(span));

        info!(%peer_id, %listen_addr, "Content server listening");

        Ok(Self {
            peer_id,
            listen_addrs: vec![listen_addr],
            tx_ctrl,
            swarm_task,
            accept_task,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    /// Endpoint other peers dial to reach this server.
    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::new(self.peer_id, self.listen_addrs.clone())
    }

    /// Announces this server as a provider of `cid` in the DHT.
    pub async fn provide(&self, cid: ContentId) -> Result<(), FetchError> {
        self.send(CtrlMsg::Provide(cid)).await
    }

    /// Adds a peer to the DHT routing table.
    pub async fn add_peer(&self, endpoint: PeerEndpoint) -> Result<(), FetchError> {
        self.send(CtrlMsg::AddPeer(endpoint)).await
    }

    pub async fn shutdown(self) {
        let _ = self.tx_ctrl.send(CtrlMsg::Shutdown).await;
    }

    async fn send(&self, msg: CtrlMsg) -> Result<(), FetchError> {
        self.tx_ctrl
            .send(msg)
            .await
            .map_err(|_| FetchError::SessionClosed)
    }
}

impl Drop for ContentServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.swarm_task.abort();
    }
}

async fn serve_request(peer: PeerId, stream: Stream, store: Arc<dyn ContentStore>) {
    let mut framed = codec::framed(stream);

    let cid = match codec::read_request(&mut framed).await {
        Ok(cid) => cid,
        Err(e) => {
            debug!(%peer, "Invalid request: {e}");
            return;
        }
    };

    let result: Result<(), RequestError> = async {
        match store.get(&cid).await {
            None => {
                trace!(%peer, %cid, "Object not held");
                codec::write_header(&mut framed, &ObjectHeader::NotFound).await?;
                codec::write_payload(&mut framed, &Bytes::new()).await
            }

            Some(StoredObject::File(bytes)) => {
                let size = bytes.len() as u64;
                codec::write_header(&mut framed, &ObjectHeader::File { size }).await?;
                codec::write_payload(&mut framed, &bytes).await
            }

            Some(StoredObject::Directory(listing)) => {
                codec::write_header(&mut framed, &ObjectHeader::Directory).await?;
                codec::write_payload(&mut framed, &Bytes::from(listing.encode())).await
            }
        }
    }
    .await;

    match result {
        Ok(()) => debug!(%peer, %cid, "Served request"),
        Err(e) => debug!(%peer, %cid, "Failed to serve request: {e}"),
    }
}

async fn run(mut swarm: Swarm<Behaviour>, mut rx_ctrl: mpsc::Receiver<CtrlMsg>) {
    loop {
        let result = tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &mut swarm)
            }

            Some(ctrl) = rx_ctrl.recv() => {
                handle_ctrl_msg(ctrl, &mut swarm)
            }
        };

        match result {
            ControlFlow::Continue(()) => continue,
            ControlFlow::Break(()) => break,
        }
    }
}

fn handle_ctrl_msg(msg: CtrlMsg, swarm: &mut Swarm<Behaviour>) -> ControlFlow<()> {
    match msg {
        CtrlMsg::Provide(cid) => {
            let key = kad::RecordKey::new(&cid.to_bytes());
            if let Err(e) = swarm.behaviour_mut().kad.start_providing(key) {
                warn!(%cid, "Failed to record provider entry: {e}");
            }
        }

        CtrlMsg::AddPeer(endpoint) => {
            for addr in endpoint.addrs {
                swarm
                    .behaviour_mut()
                    .kad
                    .add_address(&endpoint.peer_id, addr);
            }
        }

        CtrlMsg::Shutdown => {
            info!("Shutting down content server");
            return ControlFlow::Break(());
        }
    }

    ControlFlow::Continue(())
}

fn handle_swarm_event(event: SwarmEvent<NetworkEvent>, swarm: &mut Swarm<Behaviour>) -> ControlFlow<()> {
    match event {
        SwarmEvent::NewListenAddr { address, .. } => {
            trace!("Listening on {address}");
        }

        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            trace!(%peer_id, "Peer connected");
        }

        SwarmEvent::Behaviour(NetworkEvent::Identify(event)) => {
            behaviour::on_identify(swarm, *event);
        }

        SwarmEvent::Behaviour(NetworkEvent::Kad(kad::Event::OutboundQueryProgressed {
            result: kad::QueryResult::StartProviding(result),
            ..
        })) => match result {
            Ok(ok) => trace!(key = ?ok.key, "Provider record published"),
            Err(e) => debug!("Provider record not replicated: {e}"),
        },

        _ => {}
    }

    ControlFlow::Continue(())
}
