//! Configuration for the labeling engine.
//!
//! A single flat [`Config`] covers device selection, memory budgeting, border
//! merging and the adaptive threshold search. Every field has a default, and
//! partial documents deserialize with the remaining fields defaulted.

use serde::{Deserialize, Serialize};

// ============================================================================
// Enums
// ============================================================================

/// Which compute device runs the per-chunk kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Use the GPU when one is available, otherwise fall back to the CPU.
    #[default]
    Auto,
    /// Always run on the CPU.
    Cpu,
    /// Require a GPU; creating the engine fails without one.
    Gpu,
}

/// How labels that meet across chunk boundaries are unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union boundary label pairs in a disjoint set, then remap the image once.
    #[default]
    DisjointSet,
    /// Repeatedly rewrite the larger label of each mismatched boundary pair
    /// across the whole image until a full pass makes no change.
    /// Quadratic in the worst case; kept as the reference formulation.
    Rewrite,
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- Device --
    /// Compute device selection.
    pub backend: Backend,
    /// Free-memory override in bytes. If None, the device is queried.
    pub available_memory: Option<u64>,
    /// Chunk count override. Bypasses the memory decision when set.
    pub force_chunks: Option<usize>,
    /// Fraction added on top of every memory estimate.
    pub safety_margin: f64,

    // -- Border merging --
    pub merge_strategy: MergeStrategy,

    // -- Adaptive threshold search --
    /// Resolution of the intensity histogram over [0, 1].
    pub num_bins: usize,
    /// Relative band around the target size accepted as converged.
    pub tolerance: f32,
    /// The initial cutoff admits `headroom` times the target pixel count.
    pub headroom: f32,
    /// Hard cap on search iterations.
    pub max_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Device
            backend: Backend::Auto,
            available_memory: None,
            force_chunks: None,
            safety_margin: 0.1,

            // Border merging
            merge_strategy: MergeStrategy::DisjointSet,

            // Adaptive threshold search
            num_bins: 256,
            tolerance: 0.1,
            headroom: 2.0,
            max_iterations: 32,
        }
    }
}

impl Config {
    /// Host-only configuration, used where GPU initialization is unwanted.
    pub fn cpu() -> Self {
        Self {
            backend: Backend::Cpu,
            ..Self::default()
        }
    }

    /// Validate the configuration, panicking if invalid.
    pub fn validate(&self) {
        // Device
        if let Some(chunks) = self.force_chunks {
            assert!(chunks >= 1, "force_chunks must be at least 1, got {}", chunks);
        }
        assert!(
            self.safety_margin.is_finite() && self.safety_margin >= 0.0,
            "safety_margin must be non-negative, got {}",
            self.safety_margin
        );

        // Adaptive threshold search
        assert!(
            self.num_bins >= 2,
            "num_bins must be at least 2, got {}",
            self.num_bins
        );
        assert!(
            self.tolerance > 0.0 && self.tolerance < 1.0,
            "tolerance must be in (0, 1), got {}",
            self.tolerance
        );
        assert!(
            self.headroom >= 1.0,
            "headroom must be >= 1.0, got {}",
            self.headroom
        );
        assert!(
            self.max_iterations >= 1,
            "max_iterations must be at least 1, got {}",
            self.max_iterations
        );
    }
}
