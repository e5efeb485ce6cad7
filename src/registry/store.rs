//! The service registry.
//!
//! Entries live in an immutable `HashMap` behind an `ArcSwap`. Writers build
//! a new map and swap it in with `rcu`; readers load a whole snapshot and
//! never observe a partial update.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::ServiceConfig;
use crate::registry::discovery::DiscoverySource;
use crate::registry::entry::{EntryOrigin, ServiceEntry};

pub type RegistrySnapshot = Arc<HashMap<String, ServiceEntry>>;

/// What a discovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    /// Found by discovery but owned by another origin, left untouched.
    pub skipped: Vec<String>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}

/// Logical service name → location.
pub struct ServiceRegistry {
    entries: ArcSwap<HashMap<String, ServiceEntry>>,
    sources: Vec<Arc<dyn DiscoverySource>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("entries", &self.entries.load().len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl ServiceRegistry {
    /// An empty registry with no discovery sources.
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn DiscoverySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Insert or overwrite `name`. Returns false, without mutating, for an
    /// empty name or a location that is not an absolute URL.
    pub fn register(&self, name: &str, location: &str, metadata: HashMap<String, String>) -> bool {
        let Some(entry) = ServiceEntry::parse(name, location, metadata, EntryOrigin::Registered) else {
            tracing::warn!(service = name, location, "Rejected service registration");
            return false;
        };

        let key = entry.service_name.clone();
        tracing::info!(service = %key, location = %entry.base_url, "Service registered");
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.clone(), entry.clone());
            next
        });
        true
    }

    /// Remove `name`. Returns false if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let name = name.trim();
        let mut removed = false;
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(name).is_some();
            next
        });
        if removed {
            tracing::info!(service = name, "Service unregistered");
        }
        removed
    }

    pub fn resolve(&self, name: &str) -> Option<ServiceEntry> {
        self.entries.load().get(name.trim()).cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one pass over every discovery source and merge the results.
    ///
    /// Discovery may add new names and refresh entries it created earlier.
    /// It never evicts anything and never overwrites registered or
    /// configured entries. With no sources this is a no-op.
    pub async fn discover(&self) -> RegistrySnapshot {
        self.discover_with_report().await.0
    }

    pub async fn discover_with_report(&self) -> (RegistrySnapshot, DiscoveryReport) {
        if self.sources.is_empty() {
            return (self.snapshot(), DiscoveryReport::default());
        }

        let mut found = Vec::new();
        for source in &self.sources {
            found.extend(source.discover().await);
        }

        let report = self.merge_discovered(found);
        if !report.is_empty() {
            tracing::info!(
                added = ?report.added,
                updated = ?report.updated,
                "Discovery pass changed registry"
            );
        }
        (self.snapshot(), report)
    }

    fn merge_discovered(&self, found: Vec<ServiceEntry>) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        self.entries.rcu(|current| {
            report = DiscoveryReport::default();
            let mut next = HashMap::clone(current);
            for entry in &found {
                let name = entry.service_name.clone();
                let mut entry = entry.clone();
                entry.origin = EntryOrigin::Discovered;
                match next.get(&name) {
                    None => {
                        next.insert(name.clone(), entry);
                        report.added.push(name);
                    }
                    Some(existing) if existing.origin == EntryOrigin::Discovered => {
                        if !existing.same_target(&entry) {
                            next.insert(name.clone(), entry);
                            report.updated.push(name);
                        }
                    }
                    Some(_) => report.skipped.push(name),
                }
            }
            next
        });
        report
    }

    /// Sync the static config table into the registry.
    ///
    /// Configured entries missing from `services` are removed; registered and
    /// discovered entries are never touched. Invalid rows are skipped.
    pub fn apply_configured(&self, services: &[ServiceConfig]) -> usize {
        let desired: Vec<ServiceEntry> = services
            .iter()
            .filter_map(|s| {
                let parsed = ServiceEntry::parse(&s.name, &s.base_url, s.metadata.clone(), EntryOrigin::Configured);
                if parsed.is_none() {
                    tracing::warn!(service = %s.name, location = %s.base_url, "Skipping invalid configured service");
                }
                parsed
            })
            .collect();
        let wanted: HashSet<&str> = desired.iter().map(|e| e.service_name.as_str()).collect();

        let mut applied = 0;
        self.entries.rcu(|current| {
            applied = 0;
            let mut next = HashMap::clone(current);
            next.retain(|name, e| e.origin != EntryOrigin::Configured || wanted.contains(name.as_str()));
            for entry in &desired {
                let keep_existing = next.get(&entry.service_name).is_some_and(|existing| {
                    existing.origin == EntryOrigin::Registered
                        || (existing.origin == EntryOrigin::Configured && existing.same_target(entry))
                });
                if !keep_existing {
                    next.insert(entry.service_name.clone(), entry.clone());
                    applied += 1;
                }
            }
            next
        });

        tracing::info!(configured = desired.len(), applied, "Applied configured services");
        applied
    }
}
