//! Engine configuration, layered with `figment` the way the teacher layers
//! `StoragePoolConfiguration` (see `migration/mod.rs` doc example, which
//! builds a `DatabaseConfiguration` from nested structs). Values here are
//! the tunables named in spec §4.1/§4.6/§9, with the constants from the
//! teacher's `tree/imp/mod.rs` as defaults.

use serde::{Deserialize, Serialize};

#[cfg(feature = "figment_config")]
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};

/// Soft byte budget per node and the derived split/merge thresholds (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Soft byte budget for a node's serialized size (`nodesize`, §3).
    pub nodesize: usize,
    /// Target upper bound on the number of children of a nonleaf (`FANOUT`).
    pub fanout: usize,
    /// Minimum bytes to accumulate in a child buffer before it is eligible
    /// to be the heaviest-child flush target (mirrors the teacher's
    /// `MIN_FLUSH_SIZE`).
    pub min_flush_size: usize,
    /// Cap on the sequential-insert heuristic window, `min(32, size/16)`
    /// (§4.3, Open Question 1 in SPEC_FULL.md).
    pub seqinsert_window_cap: usize,
    /// `4*(size_a+size_b) > 3*nodesize` merge/no-op threshold numerator and
    /// denominator, exposed for tuning without changing the formula.
    pub merge_threshold_numerator: usize,
    pub merge_threshold_denominator: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            nodesize: 4 * 1024 * 1024,
            fanout: 16,
            min_flush_size: 256 * 1024,
            seqinsert_window_cap: 32,
            merge_threshold_numerator: 3,
            merge_threshold_denominator: 4,
        }
    }
}

impl EngineConfig {
    /// `min(32, size/16)`, the sequential-insert lookback window (§4.3).
    pub fn seqinsert_window(&self, basement_size: usize) -> usize {
        self.seqinsert_window_cap.min((basement_size / 16).max(1))
    }

    #[cfg(feature = "figment_config")]
    pub fn from_env_and_file(path: Option<&str>) -> Result<Self, figment::Error> {
        let mut fig = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            fig = fig.merge(Yaml::file(path));
        }
        fig = fig.merge(Env::prefixed("BBTREE_"));
        fig.extract()
    }
}
