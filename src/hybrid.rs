//! Managed-source / direct-probe resolution
//!
//! Some fact families exist both in an authoritative managed record (Munki's
//! install report) and as a local probe. The managed record wins when it is
//! present and non-empty; otherwise the direct probe runs. Fields the
//! managed source never tracks are always probed directly and spliced in on
//! top of whichever base was chosen.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProbeError, ProviderError};
use crate::facts::FactSet;

/// Which branch produced the base facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    Managed,
    Direct,
}

impl fmt::Display for FactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "munki"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Resolved facts and the branch they came from
#[derive(Debug, Clone, PartialEq)]
pub struct HybridResolution {
    pub facts: FactSet,
    pub source: FactSource,
}

/// Resolver bound to one provider
#[derive(Debug, Clone)]
pub struct HybridSourceResolver {
    provider: String,
}

impl HybridSourceResolver {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    /// Pick managed over direct, then merge the always-direct fields.
    ///
    /// A managed error or an empty managed set counts as absence. Only a
    /// failing direct probe, when it is needed, fails the resolution.
    pub fn resolve<M, D, A>(
        &self,
        managed: M,
        direct: D,
        always_direct: A,
    ) -> Result<HybridResolution, ProviderError>
    where
        M: FnOnce() -> Result<FactSet, ProbeError>,
        D: FnOnce() -> Result<FactSet, ProbeError>,
        A: FnOnce() -> FactSet,
    {
        let (mut facts, source) = match managed() {
            Ok(record) if !record.is_empty() => (record, FactSource::Managed),
            Ok(_) => {
                log::debug!("{}: managed record empty, probing directly", self.provider);
                (self.direct(direct)?, FactSource::Direct)
            }
            Err(e) => {
                log::debug!("{}: managed source unavailable ({}), probing directly", self.provider, e);
                (self.direct(direct)?, FactSource::Direct)
            }
        };

        for (key, value) in always_direct() {
            facts.insert(key, value);
        }

        Ok(HybridResolution { facts, source })
    }

    fn direct<D>(&self, direct: D) -> Result<FactSet, ProviderError>
    where
        D: FnOnce() -> Result<FactSet, ProbeError>,
    {
        direct().map_err(|e| e.for_provider(self.provider.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use serde_json::json;
    use std::cell::Cell;

    fn set(pairs: &[(&str, serde_json::Value)]) -> FactSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn uptime() -> FactSet {
        set(&[("uptime", json!({"seconds": 3600}))])
    }

    #[test]
    fn test_managed_record_wins_and_direct_skipped() {
        let direct_calls = Cell::new(0);
        let resolver = HybridSourceResolver::new("system_info");
        let managed = set(&[("hardware", json!({"model": "MacBookPro18,3"}))]);

        let resolved = resolver
            .resolve(
                || Ok(managed.clone()),
                || {
                    direct_calls.set(direct_calls.get() + 1);
                    Ok(set(&[("hardware", json!({"model": "probe"}))]))
                },
                uptime,
            )
            .unwrap();

        assert_eq!(resolved.source, FactSource::Managed);
        assert_eq!(resolved.facts["hardware"], managed["hardware"]);
        assert_eq!(resolved.facts["uptime"], json!({"seconds": 3600}));
        assert_eq!(direct_calls.get(), 0);
    }

    #[test]
    fn test_always_direct_overrides_managed_field() {
        let resolver = HybridSourceResolver::new("system_info");
        let resolved = resolver
            .resolve(
                || Ok(set(&[("uptime", json!("stale")), ("os", json!("14.5"))])),
                || Ok(FactSet::new()),
                uptime,
            )
            .unwrap();
        assert_eq!(resolved.facts["uptime"], json!({"seconds": 3600}));
        assert_eq!(resolved.facts["os"], json!("14.5"));
    }

    #[test]
    fn test_empty_managed_falls_back_to_direct() {
        let resolver = HybridSourceResolver::new("software_inventory");
        let direct = set(&[("items", json!(["Safari"]))]);

        let resolved = resolver
            .resolve(|| Ok(FactSet::new()), || Ok(direct.clone()), uptime)
            .unwrap();

        let mut expected = direct.clone();
        expected.extend(uptime());
        assert_eq!(resolved.source, FactSource::Direct);
        assert_eq!(resolved.facts, expected);
    }

    #[test]
    fn test_managed_error_is_absence_not_failure() {
        let resolver = HybridSourceResolver::new("system_info");
        let direct = set(&[("hardware", json!({"model": "iMac21,1"}))]);

        let resolved = resolver
            .resolve(
                || Err(ProbeError::permission_denied("report unreadable")),
                || Ok(direct.clone()),
                FactSet::new,
            )
            .unwrap();

        assert_eq!(resolved.source, FactSource::Direct);
        assert_eq!(resolved.facts, direct);
    }

    #[test]
    fn test_direct_failure_is_provider_error() {
        let resolver = HybridSourceResolver::new("system_info");
        let err = resolver
            .resolve(
                || Ok(FactSet::new()),
                || Err(ProbeError::timeout("system_profiler")),
                uptime,
            )
            .unwrap_err();
        assert_eq!(err.provider, "system_info");
        assert_eq!(err.kind(), ProviderErrorKind::Timeout);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = HybridSourceResolver::new("system_info");
        let direct = set(&[("os", json!({"version": "15.1"}))]);
        let first = resolver
            .resolve(|| Ok(FactSet::new()), || Ok(direct.clone()), uptime)
            .unwrap();
        let second = resolver
            .resolve(|| Ok(FactSet::new()), || Ok(direct.clone()), uptime)
            .unwrap();
        assert_eq!(first, second);
    }
}
