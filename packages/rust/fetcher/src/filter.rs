//! Decides which entity names a run should touch at all.

use std::collections::BTreeSet;

use schemalib_shared::{FetchConfig, namespace_of};

/// Suffixes of platform-generated companion entities (change events, feeds,
/// field history, sharing tables).
pub const NOISE_SUFFIXES: &[&str] = &[
    "ChangeEvent",
    "Feed",
    "History",
    "Share",
    "FieldHistory",
    "EventRelation",
];

/// Read-only aggregate views that never carry schema worth indexing.
pub const NOISE_EXACT: &[&str] = &[
    "ActivityHistory",
    "AggregateResult",
    "OpenActivity",
    "TaskRelation",
];

/// True for entity names that are platform noise.
pub fn is_noise(name: &str) -> bool {
    NOISE_EXACT.contains(&name) || NOISE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Noise and namespace filters, applied at every expansion step.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    prefilter_noise: bool,
    ignore_namespaces: BTreeSet<String>,
}

impl EntityFilter {
    pub fn new(prefilter_noise: bool, ignore_namespaces: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefilter_noise,
            ignore_namespaces: ignore_namespaces
                .into_iter()
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.prefilter_noise, config.ignore_namespaces.iter().cloned())
    }

    /// At least one namespace is configured for exclusion.
    pub fn ignores_namespaces(&self) -> bool {
        !self.ignore_namespaces.is_empty()
    }

    /// The entity's namespace is on the ignore list.
    pub fn namespace_ignored(&self, name: &str) -> bool {
        namespace_of(name).is_some_and(|ns| self.ignore_namespaces.contains(ns))
    }

    /// The entity passes both filters.
    pub fn admits(&self, name: &str) -> bool {
        if self.prefilter_noise && is_noise(name) {
            return false;
        }
        !self.namespace_ignored(name)
    }
}
