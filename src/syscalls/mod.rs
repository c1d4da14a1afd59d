use alloc::sync::Arc;
use alloc::string::String;
use spin::Mutex;

use crate::fs::fd::{File, FileType};
use crate::fs::pipe::PipeInner;
use crate::param::NOFILE;
use crate::scheduler::{self, Ref};

/// Syscall numbers (passed in RAX from userland).
pub const SYS_EXIT: u64 = 0;
pub const SYS_WRITE: u64 = 1;
pub const SYS_YIELD: u64 = 2;
pub const SYS_GETPID: u64 = 3;
pub const SYS_FORK: u64 = 4;
pub const SYS_EXEC: u64 = 5;
pub const SYS_WAIT: u64 = 6;

pub const SYS_OPEN: u64 = 7;
pub const SYS_CLOSE: u64 = 8;
pub const SYS_READ: u64 = 9;
pub const SYS_DUP: u64 = 10;
pub const SYS_DUP2: u64 = 11;
pub const SYS_PIPE: u64 = 12;

pub const SYS_KILL: u64 = 13;
pub const SYS_THREAD_CREATE: u64 = 14;
pub const SYS_THREAD_EXIT: u64 = 15;
pub const SYS_THREAD_JOIN: u64 = 16;
pub const SYS_SETMEMORYLIMIT: u64 = 17;
pub const SYS_PROCDUMP2: u64 = 18;
pub const SYS_EXEC2: u64 = 19;

/// Central syscall dispatcher — called from the int 0x80 handler.
/// Arguments come from registers: rax=number, rdi=arg0, rsi=arg1, rdx=arg2.
/// Returns result in rax; every `scheduler::ProcError`/`ExecError` collapses
/// to `u64::MAX` here, with the real reason only visible in the kernel log.
pub extern "C" fn dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64) -> u64 {
    // int 0x80 is an interrupt gate, so the CPU cleared IF on entry; turn it
    // back on so a long syscall can still be preempted by the timer.
    x86_64::instructions::interrupts::enable();

    match number {
        SYS_EXIT => scheduler::exit(arg0),
        SYS_YIELD => {
            scheduler::yield_now();
            0
        }
        SYS_GETPID => scheduler::current_pid().map_or(0, |p| p as u64),
        SYS_FORK => match scheduler::fork() {
            Ok(pid) => pid as u64,
            Err(e) => { crate::log_warn!("sys_fork failed: {}", e); u64::MAX }
        },
        SYS_EXEC => {
            let Some(path) = read_user_str(arg0, arg1) else { return u64::MAX };
            let stack_pages = arg2.max(1);
            match scheduler::sys_exec(&path, stack_pages) {
                Ok(()) => unreachable!("sys_exec never returns on success"),
                Err(e) => { crate::log_warn!("sys_exec failed: {}", e); u64::MAX }
            }
        }
        SYS_EXEC2 => {
            let Some(path) = read_user_str(arg0, arg1) else { return u64::MAX };
            match scheduler::spawn_program(&path, arg2.max(1)) {
                Ok(pid) => pid as u64,
                Err(e) => { crate::log_warn!("exec2 failed: {}", e); u64::MAX }
            }
        }
        SYS_WAIT => match scheduler::wait() {
            Ok((pid, retval)) => {
                if arg0 != 0 {
                    unsafe { *(arg0 as *mut u64) = retval };
                }
                pid as u64
            }
            Err(_) => u64::MAX,
        },
        SYS_KILL => {
            let pid = arg0 as i32;
            match scheduler::kill(pid) {
                Ok(()) => 0,
                Err(_) => u64::MAX,
            }
        }
        SYS_THREAD_CREATE => {
            match scheduler::thread_create(arg0, arg1, arg2.max(1)) {
                Ok(tid) => tid as u64,
                Err(e) => { crate::log_warn!("thread_create failed: {}", e); u64::MAX }
            }
        }
        SYS_THREAD_EXIT => scheduler::thread_exit(arg0),
        SYS_THREAD_JOIN => match scheduler::thread_join(arg0 as i32) {
            Ok(retval) => retval,
            Err(_) => u64::MAX,
        },
        SYS_SETMEMORYLIMIT => {
            match scheduler::setmemorylimit(arg0 as i32, arg1) {
                Ok(()) => 0,
                Err(_) => u64::MAX,
            }
        }
        SYS_PROCDUMP2 => {
            // Informational only over the raw syscall ABI; real consumers
            // use `scheduler::procdump2()` directly (the shell's `list`).
            scheduler::procdump2().len() as u64
        }
        SYS_READ => sys_read(arg0 as usize, arg1 as *mut u8, arg2 as usize),
        SYS_WRITE => sys_write_fd(arg0 as usize, arg1 as *const u8, arg2 as usize),
        SYS_OPEN => sys_open(arg0, arg1),
        SYS_CLOSE => {
            if scheduler::current_fd_close(arg0 as usize) { 0 } else { u64::MAX }
        }
        SYS_DUP => sys_dup(arg0 as usize),
        SYS_DUP2 => sys_dup2(arg0 as usize, arg1 as usize),
        SYS_PIPE => sys_pipe(arg0 as *mut [u32; 2]),
        _ => {
            crate::log_warn!("syscall: unknown number {}", number);
            u64::MAX
        }
    }
}

fn read_user_str(ptr: u64, len: u64) -> Option<String> {
    if len == 0 || len > 4096 {
        return None;
    }
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    core::str::from_utf8(slice).ok().map(String::from)
}

fn sys_read(fd: usize, ptr: *mut u8, len: usize) -> u64 {
    if fd >= NOFILE || len == 0 || len > 1024 * 1024 {
        return u64::MAX;
    }
    let slice = unsafe { core::slice::from_raw_parts_mut(ptr, len) };

    let Some(handle) = scheduler::current_fd(fd) else { return u64::MAX };

    loop {
        let mut file = handle.lock();
        if !file.readable {
            return u64::MAX;
        }

        match &mut file.file_type {
            FileType::Console => {
                // No TTY line discipline yet — a read always hands back a
                // single newline byte.
                slice[0] = b'\n';
                return 1;
            }
            FileType::Regular => return 0, // FAT32 read path not wired up yet.
            FileType::PipeRead(pipe) => {
                let pipe = pipe.clone();
                let mut inner = pipe.lock();
                if !inner.is_empty() {
                    let n = inner.read(slice);
                    drop(inner);
                    drop(file);
                    scheduler::wakeup(Arc::as_ptr(&pipe) as usize);
                    return n as u64;
                }
                if inner.active_writers() == 0 {
                    return 0; // EOF
                }
                drop(file);
                let chan = Arc::as_ptr(&pipe) as usize;
                scheduler::sleep(chan, inner);
                // loop back around and re-check
            }
            _ => return u64::MAX,
        }
    }
}

fn sys_write_fd(fd: usize, ptr: *const u8, len: usize) -> u64 {
    if fd >= NOFILE || len == 0 || len > 1024 * 1024 {
        return u64::MAX;
    }
    let slice = unsafe { core::slice::from_raw_parts(ptr, len) };

    let Some(handle) = scheduler::current_fd(fd) else { return u64::MAX };

    loop {
        let mut file = handle.lock();
        if !file.writable {
            return u64::MAX;
        }

        match &mut file.file_type {
            FileType::Console => {
                if let Ok(s) = core::str::from_utf8(slice) {
                    print_no_newline(s);
                }
                return len as u64;
            }
            FileType::Regular => return len as u64,
            FileType::PipeWrite(pipe) => {
                let pipe = pipe.clone();
                let mut inner = pipe.lock();
                if !inner.is_full() {
                    let n = inner.write(slice);
                    drop(inner);
                    drop(file);
                    scheduler::wakeup(Arc::as_ptr(&pipe) as usize);
                    return n as u64;
                }
                if inner.active_readers() == 0 {
                    return u64::MAX; // broken pipe
                }
                drop(file);
                let chan = Arc::as_ptr(&pipe) as usize;
                scheduler::sleep(chan, inner);
            }
            _ => return u64::MAX,
        }
    }
}

fn sys_open(path_ptr: u64, path_len: u64) -> u64 {
    let Some(path) = read_user_str(path_ptr, path_len) else { return u64::MAX };
    if path.is_empty() {
        return u64::MAX;
    }
    // VFS-backed regular-file opens are future work; this installs a
    // descriptor the same way the console ones are installed.
    let file = Ref::Owned(File::new_regular(&path, true, true));
    match scheduler::current_fd_install(file) {
        Some(fd) => fd as u64,
        None => u64::MAX,
    }
}

fn sys_dup(old_fd: usize) -> u64 {
    if old_fd >= NOFILE {
        return u64::MAX;
    }
    let Some(handle) = scheduler::current_fd(old_fd) else { return u64::MAX };
    match scheduler::current_fd_install(handle.dup()) {
        Some(fd) => fd as u64,
        None => u64::MAX,
    }
}

fn sys_dup2(old_fd: usize, new_fd: usize) -> u64 {
    if old_fd >= NOFILE || new_fd >= NOFILE {
        return u64::MAX;
    }
    if old_fd == new_fd {
        return new_fd as u64;
    }
    let Some(handle) = scheduler::current_fd(old_fd) else { return u64::MAX };
    if scheduler::current_fd_install_at(new_fd, handle.dup()) {
        new_fd as u64
    } else {
        u64::MAX
    }
}

fn sys_pipe(fds_ptr: *mut [u32; 2]) -> u64 {
    let inner = PipeInner::new();
    inner.lock().add_reader();
    inner.lock().add_writer();

    let read_file = Ref::Owned(Arc::new(Mutex::new(File {
        file_type: FileType::PipeRead(inner.clone()),
        path: String::from("pipe"),
        offset: 0,
        readable: true,
        writable: false,
    })));
    let write_file = Ref::Owned(Arc::new(Mutex::new(File {
        file_type: FileType::PipeWrite(inner),
        path: String::from("pipe"),
        offset: 0,
        readable: false,
        writable: true,
    })));

    let (Some(fd_read), Some(fd_write)) = (
        scheduler::current_fd_install(read_file),
        scheduler::current_fd_install(write_file),
    ) else {
        return u64::MAX;
    };

    unsafe {
        (*fds_ptr)[0] = fd_read as u32;
        (*fds_ptr)[1] = fd_write as u32;
    }
    0
}

/// Print without trailing newline.
fn print_no_newline(s: &str) {
    use core::fmt::Write;
    let _ = crate::vga::WRITER.lock().write_str(s);
    let _ = crate::serial::SERIAL1.lock().write_str(s);
}

pub fn init() {
    crate::log_info!("Syscall interface initialized.");
}
