//! [ALLOCATOR-CORE]: the `allocate`/`deallocate` entry points, size-class
//! routing, fullness-bin migration, the "too empty" release rule, and
//! the large-block path.

use std::ptr;

use crate::heap::{move_cross_heap, move_within_heap, HeapInner};
use crate::large::{pages_needed, LargeHeader};
use crate::superblock::{
    bitmap_clear, bitmap_find_first_zero, bitmap_set, bitmap_test, init_superblock,
    SuperblockHeader,
};
use crate::types::{
    fullness_bracket, size_class_for, ChunkTag, EMPTY_THRESHOLD_K, SIZE_CLASSES, SUPERBLOCK_SIZE,
};
use crate::Allocator;

impl Allocator {
    /// Allocates `size` bytes, returning a null pointer if
    /// [`crate::os::RawRegion`] is exhausted.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        let heap_idx = self.cpu_heap_index();
        match size_class_for(size) {
            Some((sz_id, block_class)) if size <= SUPERBLOCK_SIZE / 2 => {
                self.allocate_small(sz_id, block_class, heap_idx)
            }
            _ => self.allocate_large(size, heap_idx),
        }
    }

    /// Frees a pointer previously returned by [`Allocator::allocate`].
    /// Undefined behavior for any other pointer (see [ERRORS]
    /// `InvalidFree` in SPEC_FULL.md).
    pub fn deallocate(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let page_mask = !(self.page_size - 1);
        let page_base = ((ptr as usize) & page_mask) as *mut u8;
        let tag = unsafe { ptr::read(page_base as *const ChunkTag) };
        match tag {
            ChunkTag::Large => self.deallocate_large(page_base as *mut LargeHeader),
            ChunkTag::Superblock => {
                let offset = ptr as usize - page_base as usize;
                self.deallocate_small(page_base as *mut SuperblockHeader, offset);
            }
        }
    }

    /// Resolves the CPU-affinity query to a heap table index, falling
    /// back to the global heap (index 0) and logging a warning if the
    /// query fails or names a CPU with no corresponding heap (more
    /// CPUs online than were observed at `init()` time).
    fn cpu_heap_index(&self) -> usize {
        match crate::cpu::current_cpu() {
            Some(cpu) if cpu + 1 < self.heaps.len() => cpu + 1,
            Some(cpu) => {
                log::warn!(
                    "cpu index {} has no heap in a table of {} heaps, falling back to the global heap",
                    cpu,
                    self.heaps.len()
                );
                0
            }
            None => {
                log::warn!("cpu affinity query failed, falling back to the global heap");
                0
            }
        }
    }

    // ---------------------------------------------------------------
    // Small path
    // ---------------------------------------------------------------

    fn allocate_small(&self, sz_id: usize, block_class: usize, heap_idx: usize) -> *mut u8 {
        let capacity = (SUPERBLOCK_SIZE / block_class) as u32;
        let mut target = self.heaps[heap_idx].lock();

        let mut chosen = find_usable_superblock(&target, sz_id, capacity);

        if chosen.is_none() {
            if heap_idx == 0 {
                match self.obtain_or_grow_global(&mut target, sz_id, block_class) {
                    Some((sb, src_sz, src_f)) => {
                        unsafe { move_within_heap(&mut target, sb, src_sz, src_f, sz_id, 1) };
                        chosen = Some((sb, 1));
                    }
                    None => return ptr::null_mut(),
                }
            } else {
                let mut global = self.heaps[0].lock();
                match self.obtain_or_grow_global(&mut global, sz_id, block_class) {
                    Some((sb, src_sz, src_f)) => {
                        unsafe {
                            move_cross_heap(
                                &mut global,
                                src_sz,
                                src_f,
                                &mut target,
                                heap_idx,
                                sz_id,
                                1,
                                sb,
                            );
                        }
                        chosen = Some((sb, 1));
                    }
                    None => return ptr::null_mut(),
                }
            }
        }

        let (sb, current_f) = chosen.expect("chosen is populated by either search or global fallback above");

        let block_index = match unsafe { bitmap_find_first_zero(&(*sb).bitmap, capacity as usize) } {
            Some(bit) => bit,
            None => {
                debug_assert!(false, "a superblock chosen as usable must have a free bit");
                return ptr::null_mut();
            }
        };
        unsafe {
            bitmap_set(&mut (*sb).bitmap, block_index);
            (*sb).used += 1;
        }
        target.used += block_class;

        let new_used = unsafe { (*sb).used };
        let new_f = fullness_bracket(new_used, capacity);
        if new_f != current_f {
            unsafe { move_within_heap(&mut target, sb, sz_id, current_f, sz_id, new_f) };
        }

        unsafe { (sb as *mut u8).add(block_index * block_class) }
    }

    fn deallocate_small(&self, sb: *mut SuperblockHeader, offset: usize) {
        let (owner_idx, mut guard) = loop {
            let candidate = unsafe { (*sb).owner as usize };
            let guard = self.heaps[candidate].lock();
            // The owner may have migrated between the unlocked read
            // above and acquiring its lock; re-read under the lock and
            // retry against the newly observed owner if it changed.
            // Cross-heap migration is itself serialized by the
            // destination heap's lock, so this loop always converges.
            if unsafe { (*sb).owner as usize } == candidate {
                break (candidate, guard);
            }
        };

        let block_class = unsafe { (*sb).block_class as usize };
        let capacity = unsafe { (*sb).capacity };
        let sz_id = SIZE_CLASSES
            .iter()
            .position(|&c| c == block_class)
            .expect("block_class always names a known size class");
        let block_index = offset / block_class;

        let old_used = unsafe { (*sb).used };
        let old_f = fullness_bracket(old_used, capacity);

        debug_assert!(
            bitmap_test(unsafe { &(*sb).bitmap }, block_index),
            "double free: block was already marked free"
        );
        unsafe {
            bitmap_clear(&mut (*sb).bitmap, block_index);
            (*sb).used -= 1;
        }
        guard.used -= block_class;

        let new_used = unsafe { (*sb).used };
        let new_f = fullness_bracket(new_used, capacity);
        if new_f != old_f {
            unsafe { move_within_heap(&mut guard, sb, sz_id, old_f, sz_id, new_f) };
        }

        if owner_idx != 0 && guard.is_too_empty(SUPERBLOCK_SIZE, EMPTY_THRESHOLD_K) {
            self.release_one_superblock(&mut guard);
        }
    }

    /// Locates a reusable superblock in the global heap (an empty one
    /// of any class, reinitialized in place, or a nearly-empty one of
    /// exactly `block_class`), or failing that grows [`crate::os::RawRegion`]
    /// by [`Allocator::superblock_commit`] and seeds a fresh superblock
    /// into `global.bins[sz_id][0]`. Returns the superblock together
    /// with the `(size_class, fullness)` coordinates it was found or
    /// placed at, so the caller can migrate it onward.
    fn obtain_or_grow_global(
        &self,
        global: &mut HeapInner,
        sz_id: usize,
        block_class: usize,
    ) -> Option<(*mut SuperblockHeader, usize, usize)> {
        if let Some(found) = obtain_global_superblock(global, sz_id, block_class) {
            return Some(found);
        }
        let page = self.raw.grow(self.superblock_commit)?;
        let sb = page.as_ptr() as *mut SuperblockHeader;
        let used_blocks = unsafe { init_superblock(page.as_ptr(), block_class, 0) };
        unsafe { global.bins[sz_id][0].push_front(sb) };
        global.allocated += SUPERBLOCK_SIZE;
        global.used += used_blocks as usize * block_class;
        Some((sb, sz_id, 0))
    }

    /// Releases exactly one superblock from `heap` to the global heap,
    /// scanning `f = 0` then `f = 1` across size classes in order,
    /// preserving its (size_class, fullness) coordinates.
    fn release_one_superblock(&self, heap: &mut HeapInner) {
        for f in 0..=1 {
            for sz in 0..SIZE_CLASSES.len() {
                let sb = heap.bins[sz][f].first();
                if !sb.is_null() {
                    let mut global = self.heaps[0].lock();
                    unsafe {
                        move_cross_heap(heap, sz, f, &mut global, 0, sz, f, sb);
                    }
                    return;
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Large path
    // ---------------------------------------------------------------

    fn allocate_large(&self, size: usize, heap_idx: usize) -> *mut u8 {
        let num_pages = pages_needed(size, self.page_size);
        let mut node: *mut LargeHeader = ptr::null_mut();

        {
            let mut global = self.heaps[0].lock();
            let mut cursor = global.large_blocks.first();
            while !cursor.is_null() {
                let cursor_pages = unsafe { (*cursor).npages };
                if cursor_pages >= num_pages {
                    if cursor_pages > num_pages {
                        let residue = unsafe {
                            (cursor as *mut u8).add(num_pages * self.page_size) as *mut LargeHeader
                        };
                        unsafe {
                            (*residue).tag = ChunkTag::Large;
                            (*residue).npages = cursor_pages - num_pages;
                            (*residue).owner = 0;
                            global.large_blocks.replace(cursor, residue);
                            (*cursor).npages = num_pages;
                        }
                    } else {
                        unsafe { global.large_blocks.unlink(cursor) };
                    }
                    node = cursor;
                    break;
                }
                cursor = unsafe { (*cursor).next };
            }
        }

        if node.is_null() {
            let page = match self.raw.grow(num_pages * self.page_size) {
                Some(p) => p,
                None => return ptr::null_mut(),
            };
            node = page.as_ptr() as *mut LargeHeader;
        }

        unsafe {
            (*node).tag = ChunkTag::Large;
            (*node).npages = num_pages;
            (*node).owner = heap_idx as u32;
        }
        {
            let mut target = self.heaps[heap_idx].lock();
            unsafe { target.large_blocks.push_front(node) };
        }
        unsafe { (node as *mut u8).add(std::mem::size_of::<LargeHeader>()) }
    }

    fn deallocate_large(&self, node: *mut LargeHeader) {
        let owner = unsafe { (*node).owner as usize };
        {
            let mut owner_heap = self.heaps[owner].lock();
            unsafe { owner_heap.large_blocks.unlink(node) };
        }
        let mut global = self.heaps[0].lock();
        unsafe {
            (*node).owner = 0;
            global.large_blocks.push_front(node);
        }
    }
}

/// Scans `heap.bins[sz_id][4..=0]` (most-full first) for a superblock
/// with at least one free block.
fn find_usable_superblock(
    heap: &HeapInner,
    sz_id: usize,
    capacity: u32,
) -> Option<(*mut SuperblockHeader, usize)> {
    for f in (0..=4).rev() {
        for sb in heap.bins[sz_id][f].iter() {
            if unsafe { (*sb).used } < capacity {
                return Some((sb, f));
            }
        }
    }
    None
}

/// Implements SPEC_FULL.md §4.2 step 2 parts (a) and (b): locate a
/// superblock of `block_class` already sitting in the global heap,
/// without yet migrating it to the requesting heap. Returns `(pointer,
/// found_sz, found_f)` so the caller can unlink it from wherever it
/// was found. Returns `None` when the global heap has nothing usable,
/// leaving part (c) (ask [`crate::os::RawRegion`]) to the caller.
fn obtain_global_superblock(
    global: &mut HeapInner,
    sz_id: usize,
    block_class: usize,
) -> Option<(*mut SuperblockHeader, usize, usize)> {
    // (a) a completely empty superblock of any class.
    for sz in 0..SIZE_CLASSES.len() {
        let sb = global.bins[sz][0].first();
        if !sb.is_null() {
            let old_used_bytes = unsafe { (*sb).used as usize * (*sb).block_class as usize };
            let new_used_blocks = unsafe { init_superblock(sb as *mut u8, block_class, 0) };
            let new_used_bytes = new_used_blocks as usize * block_class;
            global.used = global.used - old_used_bytes + new_used_bytes;
            return Some((sb, sz, 0));
        }
    }
    // (b) a nearly-empty superblock of exactly the right class; its
    // `u` and bitmap carry across unchanged.
    let sb = global.bins[sz_id][1].first();
    if !sb.is_null() {
        return Some((sb, sz_id, 1));
    }
    None
}
