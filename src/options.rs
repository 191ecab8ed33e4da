//! Runtime-tunable knobs, read from the environment once at
//! [`crate::Allocator::new`] time.
//!
//! The teacher declares a `mod options;` that backs `option_is_enabled`/
//! `option_get` calls in `os.rs` but never ships the module itself.
//! This fills in that gap with the two knobs this allocator actually
//! needs: an override for the detected CPU count (useful for tests that
//! want a small, deterministic heap table) and an override for the
//! raw-region's reserved address space.

use std::env;

/// Default virtual address space [`crate::os::RawRegion`] reserves up
/// front. Reservation is cheap (no physical pages are committed until
/// `grow` is called), so this can be generous.
const DEFAULT_RAW_REGION_CAPACITY: usize = 1 << 34; // 16 GiB

const ENV_NUM_CPUS: &str = "HOARD_RS_NUM_CPUS";
const ENV_RAW_REGION_CAPACITY: &str = "HOARD_RS_RAW_REGION_CAPACITY";

#[derive(Debug, Clone)]
pub struct Options {
    /// Overrides [`crate::cpu::num_cpus`] when set.
    pub num_cpus: Option<usize>,
    /// Bytes of address space [`crate::os::RawRegion`] reserves.
    pub raw_region_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_cpus: None,
            raw_region_capacity: DEFAULT_RAW_REGION_CAPACITY,
        }
    }
}

impl Options {
    /// Reads overrides from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(value) = env_usize(ENV_NUM_CPUS) {
            options.num_cpus = Some(value);
        }
        if let Some(value) = env_usize(ENV_RAW_REGION_CAPACITY) {
            options.raw_region_capacity = value;
        }
        options
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
