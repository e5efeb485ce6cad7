//! Registry entries.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use url::Url;

/// Who created an entry. Decides what discovery and config reload may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Explicit `register` call.
    Registered,
    /// Static `[[services]]` table in the config file.
    Configured,
    /// A discovery pass.
    Discovered,
}

/// A reachable guard service location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub service_name: String,
    pub base_url: Url,
    pub registered_at: SystemTime,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub origin: EntryOrigin,
}

impl ServiceEntry {
    pub fn new(
        service_name: impl Into<String>,
        base_url: Url,
        metadata: HashMap<String, String>,
        origin: EntryOrigin,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            base_url,
            registered_at: SystemTime::now(),
            metadata,
            origin,
        }
    }

    /// Parse `location` into an entry; `None` for empty names or unusable URLs.
    pub fn parse(
        service_name: &str,
        location: &str,
        metadata: HashMap<String, String>,
        origin: EntryOrigin,
    ) -> Option<Self> {
        let name = service_name.trim();
        let location = location.trim();
        if name.is_empty() || location.is_empty() {
            return None;
        }
        let base_url = Url::parse(location).ok()?;
        if base_url.cannot_be_a_base() {
            return None;
        }
        Some(Self::new(name, base_url, metadata, origin))
    }

    /// Destination identifier reported as `service_used`.
    pub fn location(&self) -> &str {
        self.base_url.as_str()
    }

    /// Same service at the same place with the same metadata.
    pub fn same_target(&self, other: &ServiceEntry) -> bool {
        self.service_name == other.service_name
            && self.base_url == other.base_url
            && self.metadata == other.metadata
    }
}
