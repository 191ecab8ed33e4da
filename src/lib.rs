//! A segregated-fits, per-CPU Hoard-style concurrent memory allocator
//! core: per-CPU heaps backed by superblocks, a global parent heap that
//! absorbs fullness-class migration, and a large-block free list for
//! anything bigger than half a superblock.
//!
//! This crate deliberately does not implement `GlobalAlloc` or a C ABI
//! shim — it exposes only [`Allocator`] and the [`init`]/[`allocate`]/
//! [`deallocate`] process-wide convenience functions. Raw memory comes
//! from [`os::RawRegion`]; CPU routing comes from [`cpu`].

mod alloc;
pub mod cpu;
pub mod error;
mod heap;
mod large;
mod list;
pub mod options;
pub mod os;
mod superblock;
mod types;

use std::sync::OnceLock;

use heap::Heap;
use options::Options;
use os::RawRegion;
use types::SUPERBLOCK_SIZE;

pub use error::InitError;

/// A standalone allocator instance: its own raw region, its own heap
/// table. Most callers use the process-wide [`init`]/[`allocate`]/
/// [`deallocate`] functions instead; this constructor exists for tests
/// and for embedding more than one independent arena.
pub struct Allocator {
    raw: RawRegion,
    heaps: Vec<Heap>,
    page_size: usize,
    /// Bytes [`os::RawRegion::grow`] is asked for each time a fresh
    /// superblock is seeded: the smallest multiple of the real OS page
    /// size that covers [`SUPERBLOCK_SIZE`]. Equal to `SUPERBLOCK_SIZE`
    /// on the common 4 KiB-page target; larger on targets with bigger
    /// OS pages, in which case a superblock only occupies the front of
    /// what got committed for it.
    superblock_commit: usize,
}

impl Allocator {
    /// Builds a heap table of `num_cpus() + 1` heaps (index 0 is the
    /// global parent heap) over a freshly reserved raw region.
    pub fn new(options: Options) -> Result<Self, InitError> {
        let num_cpus = options.num_cpus.unwrap_or_else(cpu::num_cpus).max(1);
        let raw = RawRegion::reserve(options.raw_region_capacity)
            .ok_or(InitError::RawRegionUnavailable)?;
        let page_size = raw.page_size();
        let superblock_commit = ((SUPERBLOCK_SIZE + page_size - 1) / page_size) * page_size;
        let heaps = (0..=num_cpus).map(Heap::new).collect();
        Ok(Self {
            raw,
            heaps,
            page_size,
            superblock_commit,
        })
    }
}

static GLOBAL: OnceLock<Allocator> = OnceLock::new();

/// Initializes the process-wide allocator used by the free-function
/// [`allocate`]/[`deallocate`] API. Must be called exactly once before
/// any call to [`allocate`] or [`deallocate`]; a second call returns
/// [`InitError::AlreadyInitialized`] rather than silently reusing the
/// first instance.
pub fn init() -> Result<(), InitError> {
    if GLOBAL.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }
    let allocator = Allocator::new(Options::from_env())?;
    GLOBAL.set(allocator).map_err(|_| InitError::AlreadyInitialized)
}

fn global() -> &'static Allocator {
    GLOBAL
        .get()
        .expect("hoard_rs::init() must be called before allocate()/deallocate()")
}

/// Allocates `size` bytes via the process-wide allocator.
///
/// # Panics
/// Panics if [`init`] was never called.
pub fn allocate(size: usize) -> *mut u8 {
    global().allocate(size)
}

/// Frees a pointer previously returned by [`allocate`].
///
/// # Panics
/// Panics if [`init`] was never called.
///
/// # Safety
/// `ptr` must be null, or a value previously returned by [`allocate`]
/// on this same process-wide allocator, not already freed.
pub fn deallocate(ptr: *mut u8) {
    global().deallocate(ptr)
}
