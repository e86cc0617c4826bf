//! ecfs-storage: the gateway/ingest/egress surface the engine talks to
//!
//! The wire transport itself is supplied by the host through [`Transport`];
//! [`ApiClient`] turns engine operations into typed, checksummed requests.

pub mod api;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod transport;

pub use api::{
    ApiClient, ChunkPlacement, DirContent, DirTree, Linking, PublicLink, RemoteFile, RemoteFolder,
    ShareUser, Sharing, TreeFile, TreeFolder, UploadDone, UploadDoneRequest,
};
#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryTransport, RecordedCall};
pub use transport::{ApiResponse, ChunkAddress, ChunkUploadQuery, Transport};
