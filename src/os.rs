//! The raw memory provider ([RAW-REGION]).
//!
//! A contiguous, page-granular, grow-only region of address space,
//! reserved once up front and committed page-by-page as the allocator
//! asks for more. Grounded on the teacher's `os.rs` (`os_mem_alloc`,
//! `os_protectx`): reserve with no access rights, then widen the
//! committed prefix with `mprotect`/`VirtualAlloc` as `grow` is called.
//! Never shrinks, matching the "we never return memory to the OS"
//! non-goal.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(not(windows))]
use libc::{
    mmap, mprotect, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_NONE,
    PROT_READ, PROT_WRITE, _SC_PAGESIZE,
};

#[cfg(windows)]
use winapi::um::{
    memoryapi::{VirtualAlloc, VirtualFree},
    sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
    winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE},
};

/// A reserved span of address space with a page-granular committed
/// prefix. `grow` extends the committed prefix; nothing is ever
/// decommitted or released before the region is dropped.
pub struct RawRegion {
    base: *mut u8,
    capacity: usize,
    committed: AtomicUsize,
    page_size: usize,
}

// SAFETY: `base` refers to a fixed span of address space reserved for
// the lifetime of the region. The allocator only ever calls `grow`
// with the system lock held, so concurrent growth is externally
// serialized; the atomic `committed` counter exists only to let
// read-only queries stay lock-free.
unsafe impl Send for RawRegion {}
unsafe impl Sync for RawRegion {}

impl RawRegion {
    /// Reserves `capacity` bytes of address space (rounded up to a
    /// whole number of pages) without committing any of it.
    pub fn reserve(capacity: usize) -> Option<Self> {
        let page_size = query_page_size();
        let capacity = align_up(capacity.max(page_size), page_size);
        let base = reserve_address_space(capacity)?;
        Some(Self {
            base,
            capacity,
            committed: AtomicUsize::new(0),
            page_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Commits the next `n` bytes (must be a whole number of pages) of
    /// the region and returns a pointer to the start of that span, or
    /// `None` if the region's reserved capacity is exhausted.
    pub fn grow(&self, n: usize) -> Option<NonNull<u8>> {
        debug_assert_eq!(n % self.page_size, 0, "grow() requests must be page-aligned");
        let offset = self.committed.fetch_add(n, Ordering::SeqCst);
        if offset + n > self.capacity {
            self.committed.fetch_sub(n, Ordering::SeqCst);
            log::debug!(
                "raw region exhausted: requested {} bytes beyond capacity {}",
                n,
                self.capacity
            );
            return None;
        }
        let addr = unsafe { self.base.add(offset) };
        if !commit(addr, n) {
            self.committed.fetch_sub(n, Ordering::SeqCst);
            return None;
        }
        NonNull::new(addr)
    }
}

impl Drop for RawRegion {
    fn drop(&mut self) {
        release_address_space(self.base, self.capacity);
    }
}

#[cfg(not(windows))]
fn query_page_size() -> usize {
    let result = unsafe { sysconf(_SC_PAGESIZE) };
    if result > 0 {
        result as usize
    } else {
        log::warn!("sysconf(_SC_PAGESIZE) failed: {}", errno::errno());
        4096
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        if info.dwPageSize > 0 {
            info.dwPageSize as usize
        } else {
            4096
        }
    }
}

#[cfg(not(windows))]
fn reserve_address_space(capacity: usize) -> Option<*mut u8> {
    let flags = MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE;
    let addr = unsafe { mmap(ptr::null_mut(), capacity, PROT_NONE, flags, -1, 0) };
    if addr == MAP_FAILED {
        log::warn!("mmap reservation of {} bytes failed: {}", capacity, errno::errno());
        None
    } else {
        Some(addr as *mut u8)
    }
}

#[cfg(windows)]
fn reserve_address_space(capacity: usize) -> Option<*mut u8> {
    let addr = unsafe { VirtualAlloc(ptr::null_mut(), capacity, MEM_RESERVE, PAGE_NOACCESS) };
    if addr.is_null() {
        log::warn!("VirtualAlloc reservation of {} bytes failed", capacity);
        None
    } else {
        Some(addr as *mut u8)
    }
}

#[cfg(not(windows))]
fn commit(addr: *mut u8, len: usize) -> bool {
    let ok = unsafe { mprotect(addr as *mut _, len, PROT_READ | PROT_WRITE) } == 0;
    if !ok {
        log::warn!("mprotect commit of {} bytes at {:p} failed: {}", len, addr, errno::errno());
    }
    ok
}

#[cfg(windows)]
fn commit(addr: *mut u8, len: usize) -> bool {
    let result = unsafe { VirtualAlloc(addr as *mut _, len, MEM_COMMIT, PAGE_READWRITE) };
    if result.is_null() {
        log::warn!("VirtualAlloc commit of {} bytes at {:p} failed", len, addr);
        false
    } else {
        true
    }
}

#[cfg(not(windows))]
fn release_address_space(addr: *mut u8, len: usize) {
    unsafe {
        libc::munmap(addr as *mut _, len);
    }
}

#[cfg(windows)]
fn release_address_space(addr: *mut u8, _len: usize) {
    unsafe {
        VirtualFree(addr as *mut _, 0, MEM_RELEASE);
    }
}

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_advances_and_exhausts() {
        let region = RawRegion::reserve(8 * 4096).expect("reservation should succeed");
        let page_size = region.page_size();
        let first = region.grow(page_size).expect("first page should commit");
        let second = region.grow(page_size).expect("second page should commit");
        assert_ne!(first.as_ptr(), second.as_ptr());
        assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, page_size);

        let total = region.capacity;
        assert!(region.grow(total).is_none(), "growth beyond capacity must fail");
    }
}
