//! [LARGE-NODE]: header for allocations exceeding half a superblock.

use std::ptr;

use crate::list::Linked;
use crate::types::ChunkTag;

#[repr(C)]
pub struct LargeHeader {
    pub tag: ChunkTag,
    pub npages: usize,
    pub owner: u32,
    pub prev: *mut LargeHeader,
    pub next: *mut LargeHeader,
}

unsafe impl Linked for LargeHeader {
    unsafe fn prev_slot(node: *mut Self) -> *mut *mut Self {
        unsafe { ptr::addr_of_mut!((*node).prev) }
    }
    unsafe fn next_slot(node: *mut Self) -> *mut *mut Self {
        unsafe { ptr::addr_of_mut!((*node).next) }
    }
}

/// Number of whole pages needed to hold `size` payload bytes plus one
/// header.
pub fn pages_needed(size: usize, page_size: usize) -> usize {
    let header = std::mem::size_of::<LargeHeader>();
    (size + header + page_size - 1) / page_size
}
