pub mod paging;
pub mod frame_allocator;

use frame_allocator::BumpFrameAllocator;
use spin::Mutex;
use lazy_static::lazy_static;

lazy_static! {
    pub static ref FRAME_ALLOCATOR: Mutex<BumpFrameAllocator> = Mutex::new(BumpFrameAllocator::new());
}

pub fn init(multiboot_info_addr: usize) {
    let boot_info = unsafe { multiboot2::BootInformation::load(multiboot_info_addr as *const _).expect("Failed to load Multiboot2 info!") };
    let memory_map_tag = boot_info.memory_map_tag().expect("Memory map tag required");

    // Rust no_std hack to keep the parser happy: Because memory areas live behind the BootInformation struct
    // we need to materialize them if we want to bypass lifetime constraints, but as we don't have alloc yet
    // we limit our Bump Allocator to borrow directly from the boot_info pointer memory segment.
    let areas = memory_map_tag.memory_areas();
    // Reconstruct a static slice from the raw pointer since multiboot2 tag memory is static anyway.
    let static_areas: &'static [multiboot2::MemoryArea] = unsafe {
        core::slice::from_raw_parts(
            areas.as_ptr(),
            areas.len()
        )
    };

    // Hand the bump allocator the largest reported area; real free-list
    // reclamation across all areas is future work (see DESIGN.md).
    let widest = static_areas
        .iter()
        .max_by_key(|area| area.end_address() - area.start_address())
        .expect("multiboot2 memory map had no usable areas");

    let mut allocator = FRAME_ALLOCATOR.lock();
    unsafe {
        allocator.init(
            x86_64::PhysAddr::new(widest.start_address()),
            x86_64::PhysAddr::new(widest.end_address()),
        )
    };

    crate::log_info!("Physical Memory Frame Allocator initialized using Multiboot2 Map.");

    // Setup Paging
    // In our architecture, the bootloader (boot.asm) identity maps the first 1GB of memory.
    // This allows us to use physical address 0 as virtual address 0.
    use x86_64::VirtAddr;
    let phys_mem_offset = VirtAddr::new(0); // For identity mapping
    let mut mapper = unsafe { paging::init_paging(phys_mem_offset) };
    crate::log_info!("Virtual Memory Paging subsystem initialized.");

    // Initialize Heap Support (Dynamic Memory Allocation via #[global_allocator])
    crate::allocator::init_heap(&mut mapper, &mut *allocator)
        .expect("Heap initialization failed");
    
    crate::log_info!("Heap Allocator initialized successfully.");
}
