//! Test utilities: an in-memory IPAM inventory and a scriptable DHCP server.
//!
//! Both are cheaply cloneable handles on shared state, so a test can keep
//! one clone to edit or inspect while the reconciler owns another.

pub mod ipam;
pub mod transport;

pub use ipam::MemoryIpam;
pub use transport::MemoryTransport;

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
