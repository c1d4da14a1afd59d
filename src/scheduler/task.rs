use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::fs::fd::File;
use crate::fs::inode::Inode;
use crate::param::{NOFILE, PROC_NAME_MAX};

use super::context::Context;

/// Process/thread state machine. `Embryo` is a slot claimed by `allocproc`
/// before its caller has finished filling it in; nothing outside `allocproc`
/// should ever observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Register state saved across a trap from Ring 3, restored verbatim by
/// `iretq` in `fork_trampoline` / the syscall return path.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub rcx: u64,
    pub rbx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// A handle to a shared kernel object that is sometimes owned (bumps the
/// `Arc` strong count) and sometimes a bare alias of an owner that lives
/// elsewhere in the table. Threads of the same process share one `ofile`
/// table and one `cwd` by aliasing, not by `Arc::clone` — the owning thread
/// is still the one whose `Drop` eventually runs the close.
pub enum Ref<T> {
    Owned(Arc<Mutex<T>>),
    Alias(*const Mutex<T>),
}

// The aliased pointer only ever refers to a `Proc` slot inside `PTABLE`,
// which lives for the kernel's lifetime and is only ever touched under
// `PTABLE`'s lock — safe to hand across the table under that lock.
unsafe impl<T> Send for Ref<T> {}

impl<T> Ref<T> {
    pub fn owned(value: T) -> Self {
        Ref::Owned(Arc::new(Mutex::new(value)))
    }

    /// Produce a second handle to the same object that does *not* bump the
    /// strong count — used when a new thread inherits its main thread's
    /// open files and current directory.
    pub fn alias(&self) -> Ref<T> {
        match self {
            Ref::Owned(arc) => Ref::Alias(Arc::as_ptr(arc)),
            Ref::Alias(ptr) => Ref::Alias(*ptr),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        match self {
            Ref::Owned(arc) => arc.lock(),
            // Safety: see the `unsafe impl Send` note above.
            Ref::Alias(ptr) => unsafe { (**ptr).lock() },
        }
    }

    /// Genuine duplication for `fork`: an `Owned` handle produces another
    /// `Owned` handle sharing the same `Arc` (strong count goes up by one,
    /// so the underlying file/pipe only closes once every descriptor in
    /// every process referencing it has been dropped). Duplicating an
    /// `Alias` stays an alias — there is no owner to bump here, matching
    /// `proc.c`'s thread fds never being independently closed.
    pub fn dup(&self) -> Ref<T> {
        match self {
            Ref::Owned(arc) => Ref::Owned(Arc::clone(arc)),
            Ref::Alias(ptr) => Ref::Alias(*ptr),
        }
    }
}

impl<T> Clone for Ref<T> {
    /// Cloning a `Ref` never bumps a strong count by itself; `Owned` handles
    /// are only ever created by [`Ref::owned`] so that fork's "dup fd table"
    /// step stays an explicit, visible `Arc::clone` rather than happening
    /// implicitly here.
    fn clone(&self) -> Self {
        self.alias()
    }
}

/// Task control block. One slot in [`super::PTABLE`] per process *or*
/// in-kernel thread; threads share `pid`, `pgdir`, `sz` and `limit` with
/// their main thread but carry an independent `tid`, kernel stack and
/// context.
pub struct Proc {
    pub state: ProcState,
    pub pid: i32,
    pub tid: i32,
    /// Table index of the parent, re-validated against the parent's stored
    /// `pid` before use — never an owning handle, since the parent can exit
    /// and be reaped while a child still points at the slot.
    pub parent: Option<usize>,
    pub name: [u8; PROC_NAME_MAX],

    /// Physical root of this process's page table (value loaded into CR3).
    pub pgdir: u64,
    /// Size in bytes of the process's user image, shared by all of a
    /// process's threads.
    pub sz: u64,
    /// Memory limit in bytes, 0 = unlimited. Shared by all of a process's
    /// threads; `growproc` enforces it against `sz`.
    pub limit: u64,
    /// Count of non-main threads spawned under this pid, tracked on the
    /// main thread's slot only.
    pub spnum: u32,

    pub kstack: Option<Box<[u8]>>,
    pub context: Context,
    pub trapframe: Option<TrapFrame>,

    /// Opaque rendezvous token for `sleep`/`wakeup`: any stable address
    /// (a kernel object's address, a table slot's own address) cast to
    /// `usize`. `None` when not sleeping.
    pub chan: Option<usize>,
    /// Set by `kill`; checked by the sleep loop and the trap return path so
    /// a killed process unwinds instead of sleeping forever.
    pub killed: bool,

    pub ofile: Vec<Option<Ref<File>>>,
    pub cwd: Option<Ref<Inode>>,

    /// Exit code delivered to `thread_join`, valid once `state == Zombie`.
    pub threadretval: u64,

    /// Virtual memory regions owned by this image, freed on exit/exec.
    /// Not shared between threads of the same pid — only the main thread's
    /// entry is authoritative and is what `exit`/`growproc` act on.
    pub user_allocations: Vec<(u64, u64)>,
}

impl Proc {
    /// A fresh `Unused` slot. Real initialization happens in `allocproc`.
    pub fn unused() -> Self {
        let mut ofile = Vec::with_capacity(NOFILE);
        for _ in 0..NOFILE {
            ofile.push(None);
        }

        Proc {
            state: ProcState::Unused,
            pid: 0,
            tid: 0,
            parent: None,
            name: [0; PROC_NAME_MAX],
            pgdir: 0,
            sz: 0,
            limit: 0,
            spnum: 0,
            kstack: None,
            context: Context::empty(),
            trapframe: None,
            chan: None,
            killed: false,
            ofile,
            cwd: None,
            threadretval: 0,
            user_allocations: Vec::new(),
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; PROC_NAME_MAX];
        let bytes = name.as_bytes();
        let n = bytes.len().min(PROC_NAME_MAX - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("?")
    }

    /// True when this slot is the main thread of its process — the thread
    /// whose `parent` points at the slot that spawned the *process*, not a
    /// sibling thread's own parent slot. Mirrors `proc.c`'s
    /// `curproc->parent->pid == curproc->pid` main-thread check: a thread's
    /// `parent` is reparented to point back at `self` when it's spawned, so
    /// only the main thread keeps a parent outside its own pid family.
    pub fn is_main_thread(&self, parent_pid: Option<i32>) -> bool {
        parent_pid != Some(self.pid)
    }
}
