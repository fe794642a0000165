use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::{HandoffFlag, StatusError};

/// Which local process a status query is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Service {
    Node,
    Assistant,
}

/// Software identity a running process reports about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub enclave_id: String,
    pub version: String,
}

impl FromStr for NodeIdentity {
    type Err = StatusError;

    /// Parses the `<enclaveId>@<version>` answer of the status surface.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        match s.split_once('@') {
            Some((enclave_id, version)) if !version.is_empty() => Ok(Self {
                enclave_id: enclave_id.to_string(),
                version: version.to_string(),
            }),
            _ => Err(StatusError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.enclave_id, self.version)
    }
}

/// Local status surfaces of the node and the hand-off assistant.
#[async_trait]
pub trait StatusSurface: Send + Sync {
    async fn version(&self, service: Service) -> Result<NodeIdentity, StatusError>;

    /// Current value of a hand-off flag, as reported by the assistant.
    async fn flag(&self, flag: HandoffFlag) -> Result<bool, StatusError>;
}

/// [`StatusSurface`] over the plain HTTP endpoints both processes expose.
#[derive(Clone, Debug)]
pub struct HttpStatusClient {
    node_url: String,
    assistant_url: String,
    client: Client,
}

impl HttpStatusClient {
    pub fn new(
        host: &str,
        node_port: u16,
        assistant_port: u16,
        timeout: Duration,
    ) -> Result<Self, StatusError> {
        Self::with_base_urls(
            format!("http://{host}:{node_port}"),
            format!("http://{host}:{assistant_port}"),
            timeout,
        )
    }

    pub fn with_base_urls(
        node_url: impl Into<String>,
        assistant_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StatusError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StatusError::Unreachable(e.to_string()))?;

        Ok(Self {
            node_url: node_url.into(),
            assistant_url: assistant_url.into(),
            client,
        })
    }

    async fn get(&self, base: &str, path: &str) -> Result<String, StatusError> {
        let url = format!("{base}{path}");
        trace!(%url, "Status request");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| StatusError::Unreachable(format!("{url}: {e}")))?;

        resp.text()
            .await
            .map_err(|e| StatusError::Unreachable(format!("{url}: {e}")))
    }
}

#[async_trait]
impl StatusSurface for HttpStatusClient {
    async fn version(&self, service: Service) -> Result<NodeIdentity, StatusError> {
        let base = match service {
            Service::Node => &self.node_url,
            Service::Assistant => &self.assistant_url,
        };

        self.get(base, "/version").await?.parse()
    }

    async fn flag(&self, flag: HandoffFlag) -> Result<bool, StatusError> {
        let body = self.get(&self.assistant_url, flag.path()).await?;

        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(StatusError::Malformed(other.to_string())),
        }
    }
}
