//! Kea DHCPv4 configuration: document model, transports and staging.

pub mod document;
pub mod error;
pub mod http;
pub mod staging;
pub mod transport;

pub use document::{Dhcp4Config, PoolItem, ReservationItem, SubnetCorrelation, SubnetItem};
pub use error::KeaError;
pub use staging::{CommitMode, StagingStore};
pub use transport::{FileTransport, Transport, connect};
