//! Client side of the ledger: who stores a content object, which peers are
//! trusted, and which software identity is currently authorized.

mod client;
mod committee;
mod error;
mod ledger;
mod oracle;
mod resolver;
mod rpc;

pub use client::LedgerOracle;
pub use committee::CommitteeKey;
pub use error::OracleError;
pub use ledger::{FileRecord, LedgerConnector, LedgerRpc};
pub use oracle::{Providers, TrustOracle};
pub use resolver::{PeerResolver, Resolution};
pub use rpc::{JsonRpcConnector, JsonRpcLedger};
