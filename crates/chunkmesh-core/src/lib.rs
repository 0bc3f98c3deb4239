//! chunkmesh-core: wire format, content hashes, descriptors and configuration.
//! All other chunkmesh crates depend on this one.

pub mod config;
pub mod hash;
pub mod manifest;
pub mod wire;

pub use hash::ContentHash;
pub use manifest::{ChunkDescriptor, FileDescriptor, FileSummary, PeerLocation, PublishReceipt};
pub use wire::Op;
