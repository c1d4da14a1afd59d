use x86_64::{
    structures::paging::PageTable,
    VirtAddr,
};

/// Initialize the Paging module.
/// 
/// This provides the base structure to manage memory.
/// In a more complex layout, this would construct the OffsetPageTable 
/// from the active level 4 table and abstract Virtual Memory.
pub unsafe fn init_paging(physical_memory_offset: VirtAddr) {
    let _active_level_4 = active_level_4_table(physical_memory_offset);
    // Future expansion: returning x86_64::structures::paging::OffsetPageTable<'static>
}

const PAGE_SIZE: u64 = 4096;

/// Back `[addr, addr + size)` with physical frames. The first gigabyte is
/// identity-mapped by the boot trampoline, so a frame handed out by the
/// bump allocator is already usable at the matching virtual address — there
/// is no page-table walk to build here, only frames to reserve.
pub fn allocate_user_memory(addr: VirtAddr, size: u64) -> bool {
    let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
    let mut allocator = crate::memory::FRAME_ALLOCATOR.lock();
    use x86_64::structures::paging::FrameAllocator;
    for _ in 0..pages {
        if allocator.allocate_frame().is_none() {
            return false;
        }
    }
    let _ = addr;
    true
}

/// No-op until the bump allocator grows a free list (see DESIGN.md):
/// `BumpFrameAllocator` never reclaims frames either, so there is nothing
/// to give back yet. Kept as a real call site so `growproc`/`exit` don't
/// need to change when reclamation lands.
pub fn free_user_memory(addr: VirtAddr, size: u64) {
    let _ = (addr, size);
}

unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    use x86_64::registers::control::Cr3;
    
    let (level_4_table_frame, _) = Cr3::read();
    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();
    
    &mut *page_table_ptr
}
