//! Data types shared by the download pipeline and the upgrade coordinator.

// For coverage on nightly
#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod content_id;
mod directory;
mod endpoint;
mod program;
mod transmit;
mod version;

pub use content_id::{ContentHasher, ContentId, ParseContentIdError, SHA2_256};
pub use directory::{DirectoryEntry, DirectoryListing, EntryKind, InvalidEntryName};
pub use endpoint::{ParseEndpointError, PeerEndpoint};
pub use program::{AuthorizedProgram, EnclaveAuthorization};
pub use transmit::TransmitStatus;
pub use version::{ParseVersionError, ProgramVersion};

pub use libp2p_identity::PeerId;
pub use multiaddr::Multiaddr;
