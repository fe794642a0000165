use tracing::info;

use dcmanager_oracle::PeerResolver;
use dcmanager_types::ContentId;

use crate::{ContentObject, DownloadSession, FetchError, SessionConfig};

/// Opens download sessions bootstrapped against the peers the ledger names.
pub struct ContentFetcher {
    resolver: PeerResolver,
    config: SessionConfig,
}

impl ContentFetcher {
    pub fn new(resolver: PeerResolver, config: SessionConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolves the peers for `cid` and returns a session connected to as many
    /// of them as answered within the bootstrap timeout.
    ///
    /// A session with no connected peer is still returned: it may find the
    /// object on the local network or through the DHT.
    pub async fn open_session(&self, cid: &ContentId) -> Result<DownloadSession, FetchError> {
        let resolution = self.resolver.resolve(cid).await?;

        let session = DownloadSession::spawn(self.config.clone())?;
        let connected = session.bootstrap(&resolution.peers).await;

        info!(
            %cid,
            resolved = resolution.peers.len(),
            connected,
            size = ?resolution.size,
            "Session bootstrapped"
        );

        Ok(session)
    }

    /// Retrieves one object through a new session. A returned file keeps the
    /// session open until it is dropped.
    pub async fn fetch_object(&self, cid: &ContentId) -> Result<ContentObject, FetchError> {
        let session = self.open_session(cid).await?;
        session.fetch(cid).await
    }
}
