use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use dcmanager_types::{AuthorizedProgram, ContentId, EnclaveAuthorization};

use crate::{FileRecord, LedgerConnector, LedgerRpc, OracleError};

/// Ledger queries over the node's HTTP JSON-RPC endpoint.
pub struct JsonRpcLedger {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    is_syncing: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerRecord {
    ip_address: String,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, OracleError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(%method, id, "Ledger request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("{method}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("{method}: HTTP {status}")));
        }

        let resp = resp
            .json::<RpcResponse>()
            .await
            .map_err(|e| OracleError::Unavailable(format!("{method}: {e}")))?;

        if let Some(error) = resp.error {
            return Err(OracleError::Unavailable(format!(
                "{method}: error {}: {}",
                error.code, error.message
            )));
        }

        serde_json::from_value(resp.result)
            .map_err(|e| OracleError::Unavailable(format!("{method}: invalid result: {e}")))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn is_syncing(&self) -> Result<bool, OracleError> {
        let health: Health = self.call("system_health", json!([])).await?;
        Ok(health.is_syncing)
    }

    async fn file_info(&self, cid: &ContentId) -> Result<Option<FileRecord>, OracleError> {
        self.call("dcNode_fileInfo", json!([cid.to_string()])).await
    }

    async fn peer_address(&self, peer_id: &str) -> Result<Option<String>, OracleError> {
        let record: Option<PeerRecord> = self.call("dcNode_peerInfo", json!([peer_id])).await?;
        Ok(record.map(|r| r.ip_address))
    }

    async fn trusted_storage_nodes(&self) -> Result<Vec<String>, OracleError> {
        let nodes: Option<Vec<String>> = self
            .call("dcNode_trustedStorageNodes", json!([]))
            .await?;
        Ok(nodes.unwrap_or_default())
    }

    async fn program(&self) -> Result<Option<AuthorizedProgram>, OracleError> {
        self.call("dcNode_program", json!([])).await
    }

    async fn enclave_ids(&self) -> Result<Vec<EnclaveAuthorization>, OracleError> {
        let ids: Option<Vec<EnclaveAuthorization>> = self.call("dcNode_enclaveIds", json!([])).await?;
        Ok(ids.unwrap_or_default())
    }
}

/// Connects to a JSON-RPC ledger endpoint, probing its health once.
#[derive(Clone, Debug)]
pub struct JsonRpcConnector {
    url: String,
    timeout: Duration,
}

impl JsonRpcConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LedgerConnector for JsonRpcConnector {
    async fn connect(&self) -> Result<Arc<dyn LedgerRpc>, OracleError> {
        let ledger = JsonRpcLedger::new(self.url.clone(), self.timeout)?;
        ledger.is_syncing().await?;
        Ok(Arc::new(ledger))
    }
}
