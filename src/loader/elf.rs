use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

// ══════════════════════════════════════════════════════════════
//  ELF64 constants
// ══════════════════════════════════════════════════════════════

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8    = 2;
const ELFDATA2LSB: u8   = 1;
const ET_EXEC: u16      = 2;
const EM_X86_64: u16    = 62;
const PT_LOAD: u32      = 1;

// ══════════════════════════════════════════════════════════════
//  ELF64 structures
// ══════════════════════════════════════════════════════════════

struct Elf64Ehdr {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf64Ehdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 64 { return Err(ExecError::InvalidFormat); }
        if data[0..4] != ELF_MAGIC { return Err(ExecError::InvalidFormat); }
        if data[4] != ELFCLASS64 { return Err(ExecError::UnsupportedArch); }
        if data[5] != ELFDATA2LSB { return Err(ExecError::UnsupportedArch); }

        let e_type = u16::from_le_bytes([data[16], data[17]]);
        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        if e_type != ET_EXEC { return Err(ExecError::UnsupportedType); }
        if e_machine != EM_X86_64 { return Err(ExecError::UnsupportedArch); }

        Ok(Elf64Ehdr {
            e_entry: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            e_phoff: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            e_phentsize: u16::from_le_bytes([data[54], data[55]]),
            e_phnum: u16::from_le_bytes([data[56], data[57]]),
        })
    }
}

struct Elf64Phdr {
    p_type: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

impl Elf64Phdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 56 { return Err(ExecError::InvalidFormat); }
        Ok(Elf64Phdr {
            p_type: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            p_offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            p_vaddr: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            p_filesz: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            p_memsz: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        })
    }
}

// ══════════════════════════════════════════════════════════════
//  ExecError
// ══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub enum ExecError {
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    MemoryError,
    ReadError,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::FileNotFound    => write!(f, "File not found"),
            ExecError::InvalidFormat   => write!(f, "Invalid ELF format"),
            ExecError::UnsupportedArch => write!(f, "Unsupported architecture"),
            ExecError::UnsupportedType => write!(f, "Unsupported ELF type (need ET_EXEC)"),
            ExecError::MemoryError     => write!(f, "Memory allocation error"),
            ExecError::ReadError       => write!(f, "File read error"),
        }
    }
}

// ══════════════════════════════════════════════════════════════
//  User-mode task info — stored globally so the trampoline can access it
// ══════════════════════════════════════════════════════════════

use spin::Mutex;

/// Info needed by the usermode trampoline (one at a time).
struct UserTaskInfo {
    entry: u64,
    user_stack_top: u64,
}

static PENDING_USER_TASK: Mutex<Option<UserTaskInfo>> = Mutex::new(None);

/// Stash the entry point/stack for the next task whose context targets
/// [`usermode_trampoline`]. Must be called before that context is switched
/// into — there is only one pending slot, matching this kernel's cooperative,
/// one-task-starts-at-a-time boot/exec path.
pub fn set_pending_user_task(entry: u64, user_stack_top: u64) {
    *PENDING_USER_TASK.lock() = Some(UserTaskInfo { entry, user_stack_top });
}

/// Trampoline function — runs as a kernel task, then jumps to Ring 3.
pub fn usermode_trampoline() {
    let info = {
        let mut pending = PENDING_USER_TASK.lock();
        pending.take().expect("no pending user task info")
    };

    let user_cs = crate::interrupts::gdt::user_code_selector().0;
    let user_ss = crate::interrupts::gdt::user_data_selector().0;

    crate::log_info!("ELF: jumping to Ring 3 — entry={:#x} stack={:#x} cs={:#x} ss={:#x}",
        info.entry, info.user_stack_top, user_cs, user_ss);

    crate::interrupts::usermode::jump_to_usermode(
        info.entry,
        info.user_stack_top,
        user_cs,
        user_ss,
    );
}

// ══════════════════════════════════════════════════════════════
//  ELF Loader
// ══════════════════════════════════════════════════════════════

/// Default stack size for user programs when a caller doesn't ask for a
/// specific `stack_pages` count (4 pages, 16 KiB).
const DEFAULT_STACK_PAGES: u64 = 4;
const PAGE_SIZE: u64 = 4096;

/// Everything `scheduler::sys_exec` needs to finish installing a freshly
/// loaded image into the calling process's slot.
pub struct ExecImage {
    pub entry: u64,
    pub user_stack_top: u64,
    pub image_size: u64,
    /// `(base, size)` regions that now need freeing on the next exec/exit.
    pub allocations: alloc::vec::Vec<(u64, u64)>,
}

/// Parse an ELF64 binary, map its segments and a `stack_pages`-page user
/// stack, and return what's needed to resume into it. Doesn't touch the
/// process table — that's `scheduler::sys_exec`'s job, since it has to
/// juggle the *old* image's teardown too.
pub fn parse_and_map_elf(path: &str, stack_pages: u64) -> Result<ExecImage, ExecError> {
    let file_data = read_file_all(path)?;
    let ehdr = Elf64Ehdr::parse(&file_data)?;

    crate::log_info!("ELF: entry={:#x} phoff={} phnum={}", ehdr.e_entry, ehdr.e_phoff, ehdr.e_phnum);

    let mut load_base: u64 = u64::MAX;
    let mut load_end: u64 = 0;

    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf64Phdr::parse(&file_data[off..])?;
        if phdr.p_type != PT_LOAD { continue; }
        if phdr.p_vaddr < load_base { load_base = phdr.p_vaddr; }
        let seg_end = phdr.p_vaddr + phdr.p_memsz;
        if seg_end > load_end { load_end = seg_end; }
    }

    if load_base == u64::MAX {
        return Err(ExecError::InvalidFormat);
    }

    let stack_bytes = stack_pages.max(DEFAULT_STACK_PAGES) * PAGE_SIZE;
    let load_end_aligned = (load_end + 4095) & !4095;
    let user_stack_base = load_end_aligned;
    let user_stack_top = user_stack_base + stack_bytes;

    let image_size = load_end - load_base;
    if !crate::memory::paging::allocate_user_memory(x86_64::VirtAddr::new(load_base), image_size) {
        return Err(ExecError::MemoryError);
    }
    if !crate::memory::paging::allocate_user_memory(x86_64::VirtAddr::new(user_stack_base), stack_bytes) {
        return Err(ExecError::MemoryError);
    }

    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf64Phdr::parse(&file_data[off..])?;
        if phdr.p_type != PT_LOAD { continue; }

        let dest_ptr = phdr.p_vaddr as *mut u8;
        let file_offset = phdr.p_offset as usize;
        let file_size = phdr.p_filesz as usize;

        if file_offset + file_size <= file_data.len() {
            unsafe {
                core::ptr::copy_nonoverlapping(
                    file_data[file_offset..].as_ptr(),
                    dest_ptr,
                    file_size,
                );
            }
        }

        if phdr.p_memsz > phdr.p_filesz {
            let bss_size = (phdr.p_memsz - phdr.p_filesz) as usize;
            unsafe {
                core::ptr::write_bytes(dest_ptr.add(file_size), 0, bss_size);
            }
        }
    }

    crate::log_info!(
        "ELF: mapped at {:#x}, entry={:#x} stack_top={:#x}",
        load_base, ehdr.e_entry, user_stack_top
    );

    Ok(ExecImage {
        entry: ehdr.e_entry,
        user_stack_top,
        image_size: load_end,
        allocations: alloc::vec![(load_base, image_size), (user_stack_base, stack_bytes)],
    })
}

fn read_file_all(path: &str) -> Result<Vec<u8>, ExecError> {
    let vfs = crate::fs::VFS.lock();
    let inode = vfs.lookup(path).map_err(|_| ExecError::FileNotFound)?;
    if inode.size == 0 { return Err(ExecError::InvalidFormat); }
    let mut buf = vec![0u8; inode.size];
    let bytes_read = vfs.read_file(path, 0, &mut buf).map_err(|_| ExecError::ReadError)?;
    buf.truncate(bytes_read);
    Ok(buf)
}
