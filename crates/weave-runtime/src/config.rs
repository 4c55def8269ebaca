#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Plain struct with a `Default` and `with_*` builders. [`RuntimeConfig::from_env`]
//! overlays environment variables on the defaults:
//!
//! | Variable | Field |
//! |---|---|
//! | `WEAVE_MAX_FLUSH_PASSES` | `max_flush_passes` |
//! | `WEAVE_TRACE_FLUSH` | `trace_flush` (`1`/`true`/`yes`/`on`) |

use std::rc::Rc;

/// Default iteration cap of one differ flush.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 64;

/// Native element types compiled as leaves by default.
pub const DEFAULT_LEAF_TYPES: &[&str] = &[
    "text", "image", "input", "textarea", "video", "web", "switch",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum passes of the flush-until-empty loop before it gives up and
    /// re-arms for the next turn.
    pub max_flush_passes: usize,
    /// Element types whose child operations are no-ops.
    pub leaf_types: Vec<Rc<str>>,
    /// Emit a trace event per flush pass.
    pub trace_flush: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            leaf_types: DEFAULT_LEAF_TYPES.iter().map(|t| Rc::from(*t)).collect(),
            trace_flush: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `WEAVE_*` environment variables. Unparsable
    /// values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(passes) = lookup("WEAVE_MAX_FLUSH_PASSES").and_then(|v| v.trim().parse().ok()) {
            config.max_flush_passes = passes;
        }
        if let Some(flag) = lookup("WEAVE_TRACE_FLUSH") {
            config.trace_flush = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        config
    }

    #[must_use]
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }

    #[must_use]
    pub fn with_leaf_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Rc<str>>,
    {
        self.leaf_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_trace_flush(mut self, enabled: bool) -> Self {
        self.trace_flush = enabled;
        self
    }

    #[must_use]
    pub fn is_leaf(&self, tag: &str) -> bool {
        self.leaf_types.iter().any(|t| &**t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_flush_passes, 64);
        assert!(config.is_leaf("text"));
        assert!(!config.is_leaf("div"));
        assert!(!config.trace_flush);
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("WEAVE_MAX_FLUSH_PASSES", " 8 "), ("WEAVE_TRACE_FLUSH", "Yes")]);
        let config = RuntimeConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.max_flush_passes, 8);
        assert!(config.trace_flush);
    }

    #[test]
    fn bad_env_values_fall_back() {
        let config = RuntimeConfig::from_lookup(|k| {
            (k == "WEAVE_MAX_FLUSH_PASSES").then(|| "lots".to_string())
        });
        assert_eq!(config.max_flush_passes, DEFAULT_MAX_FLUSH_PASSES);
    }

    #[test]
    fn builders() {
        let config = RuntimeConfig::default()
            .with_max_flush_passes(0)
            .with_leaf_types(["label"])
            .with_trace_flush(true);
        assert_eq!(config.max_flush_passes, 1);
        assert!(config.is_leaf("label"));
        assert!(!config.is_leaf("text"));
        assert!(config.trace_flush);
    }
}
