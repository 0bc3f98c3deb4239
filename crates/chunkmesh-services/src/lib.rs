//! chunkmesh-services: everything that moves or stores chunk bytes.
//!
//! The listener side (`listener`, `dispatch`, `store`) serves other peers;
//! the client side (`client`, `distribute`, `collect`) drives uploads and
//! downloads; `transfer` ties both to the tracker.

pub mod client;
pub mod collect;
pub mod dispatch;
pub mod distribute;
pub mod error;
pub mod listener;
pub mod rotation;
pub mod store;
pub mod tracker;
pub mod transfer;

pub use client::{PeerClient, PeerError};
pub use collect::{CollectReport, Collector};
pub use dispatch::{Dispatcher, ServeSettings};
pub use distribute::{DistributionReport, Distributor};
pub use error::TransferError;
pub use listener::{ListenerHandle, PeerListener};
pub use store::{ChunkStore, Received};
pub use tracker::{TrackerClient, TrackerError};
pub use transfer::{PublishOutcome, Swarm};
