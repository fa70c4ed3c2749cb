pub mod attrs;
pub mod config;
pub mod ipam;
pub mod item;
pub mod kea;
pub mod logging;
pub mod reconciler;
pub mod rest;
pub mod test_util;

pub use config::{Args, Config, ConfigError};
pub use ipam::{IpamError, IpamSource, NetboxClient};
pub use kea::{CommitMode, KeaError, StagingStore, Transport};
pub use reconciler::{EntityKind, Reconciler, SyncError};
