//! Degraded local responses.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::FallbackConfig;
use crate::orchestrator::error::GuardError;
use crate::orchestrator::types::{OrchestrationRequest, ServiceType};

/// Computes a substitute result when a guard cannot be reached.
///
/// Returning `Err` means the fallback itself failed; the caller then sees the
/// original failure classification with the fallback's message.
pub trait FallbackResponder: Send + Sync {
    fn respond(&self, request: &OrchestrationRequest, cause: &GuardError) -> Result<Map<String, Value>, String>;
}

impl<F> FallbackResponder for F
where
    F: Fn(&OrchestrationRequest, &GuardError) -> Result<Map<String, Value>, String> + Send + Sync,
{
    fn respond(&self, request: &OrchestrationRequest, cause: &GuardError) -> Result<Map<String, Value>, String> {
        self(request, cause)
    }
}

/// Returns a fixed object, annotated with why it was used.
#[derive(Debug, Clone)]
pub struct StaticFallback {
    data: Map<String, Value>,
}

impl StaticFallback {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

impl FallbackResponder for StaticFallback {
    fn respond(&self, _request: &OrchestrationRequest, cause: &GuardError) -> Result<Map<String, Value>, String> {
        let mut data = self.data.clone();
        data.entry("degraded").or_insert(Value::Bool(true));
        data.entry("fallback_reason")
            .or_insert_with(|| Value::String(cause.error_code().to_string()));
        Ok(data)
    }
}

/// Build static responders from the `[fallbacks.<service>]` tables. Unknown
/// service names are skipped; validation already reports them.
pub fn fallbacks_from_config(
    table: &std::collections::BTreeMap<String, FallbackConfig>,
) -> HashMap<ServiceType, StaticFallback> {
    table
        .iter()
        .filter_map(|(name, cfg)| {
            let service = name.parse::<ServiceType>().ok()?;
            Some((service, StaticFallback::new(cfg.data.clone())))
        })
        .collect()
}
