//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! register / unregister (admin API)  ─┐
//! [[services]] on load and reload    ─┼─→ ServiceRegistry (ArcSwap snapshot)
//! DiscoveryTask → DiscoverySource(s) ─┘          │
//!                                                └─→ resolve(name) from the dispatcher
//! ```
//!
//! Entries are never expired. Discovery only adds or refreshes what it
//! created itself.

pub mod discovery;
pub mod entry;
pub mod store;

pub use discovery::{DiscoveryHandle, DiscoverySource, DiscoveryTask, HttpProbeSource, StaticSource};
pub use entry::{EntryOrigin, ServiceEntry};
pub use store::{DiscoveryReport, RegistrySnapshot, ServiceRegistry};
