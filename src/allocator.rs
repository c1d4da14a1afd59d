//! Kernel heap.
//!
//! The process table is `alloc`-backed (`Arc<Mutex<File>>` descriptors,
//! `Vec` children lists, `String` names), so a global allocator has to exist
//! before `scheduler::init()` runs. Memory is handed out by
//! [`linked_list_allocator`], the standard first-fit free-list allocator used
//! by kernels in this style (BIOS-booted via the `bootloader` crate, no
//! on-demand paging yet).
//!
//! The first gigabyte of physical memory is identity-mapped by the boot
//! trampoline (see `memory::mod`), so physical frames handed out by
//! [`BumpFrameAllocator`] are already valid kernel virtual addresses — no
//! page-table mapping step is required to back the heap.

use linked_list_allocator::LockedHeap;
use x86_64::structures::paging::{FrameAllocator, Size4KiB};

use crate::memory::frame_allocator::BumpFrameAllocator;

/// 256 KiB, enough for process-table bookkeeping and VFS metadata during
/// early boot. Matches the sizing used by other kernels in this style
/// (`nadeeshafdo-MinimalOS`'s heap is the same order of magnitude).
pub const HEAP_SIZE: usize = 256 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Reserve `HEAP_SIZE` bytes of identity-mapped physical memory from
/// `frame_allocator` and hand it to the global allocator.
///
/// `_mapper` is accepted for symmetry with a future on-demand-paged heap;
/// today the heap lives entirely inside the identity-mapped region so no
/// mapping call is needed.
pub fn init_heap(
    _mapper: &mut (),
    frame_allocator: &mut BumpFrameAllocator,
) -> Result<(), &'static str> {
    let frame_count = HEAP_SIZE / 4096;
    let mut heap_start = None;
    let mut expected_next = None;

    for _ in 0..frame_count {
        let frame = frame_allocator
            .allocate_frame()
            .ok_or("out of physical memory while reserving the kernel heap")?;
        let addr = frame.start_address().as_u64() as usize;

        if heap_start.is_none() {
            heap_start = Some(addr);
        } else if Some(addr) != expected_next {
            return Err("kernel heap frames were not contiguous");
        }
        expected_next = Some(addr + 4096);
    }

    let heap_start = heap_start.ok_or("requested a zero-sized heap")?;
    unsafe {
        ALLOCATOR.lock().init(heap_start as *mut u8, HEAP_SIZE);
    }
    Ok(())
}
