pub mod task;
pub mod context;

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::fs::fd::File;
use crate::param::{KSTACK_SIZE, NPROC, PROC_NAME_MAX};
pub use task::{Proc, ProcState, Ref, TrapFrame};
use context::Context;

/// Errors surfaced at the syscall boundary. `syscalls::dispatch` converts
/// every variant to `u64::MAX`; the variant itself only matters for the
/// `log_warn!` line logged before the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    NoSuchProcess,
    NoSuchThread,
    CannotJoinSelf,
    OutOfMemory,
    LimitExceeded,
}

impl core::fmt::Display for ProcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ProcError::NoSuchProcess => "no such process",
            ProcError::NoSuchThread => "no such thread",
            ProcError::CannotJoinSelf => "a thread cannot join itself",
            ProcError::OutOfMemory => "out of memory",
            ProcError::LimitExceeded => "memory limit exceeded",
        };
        write!(f, "{}", msg)
    }
}

/// The process table: a fixed array of TCBs plus the pid/tid counters,
/// guarded by a single lock. `nextpid`/`nexttid` live here, not behind
/// separate atomics, because `thread_create`'s pid-counter rollback has to
/// happen under the same lock that handed the counter out.
struct ProcTable {
    procs: [Proc; NPROC],
    nextpid: i32,
    nexttid: i32,
}

lazy_static! {
    static ref PTABLE: Mutex<ProcTable> = Mutex::new(ProcTable {
        procs: core::array::from_fn(|_| Proc::unused()),
        nextpid: 1,
        nexttid: 1,
    });
}

/// Per-CPU scheduler state. `NCPU == 1` in this kernel (see `param::NCPU`),
/// so there is exactly one of these; it is still its own lock domain from
/// `PTABLE` so `mycpu()` style lookups don't need the whole table locked.
struct Cpu {
    /// Table slot currently running on this CPU, if any.
    proc: Option<usize>,
    /// Saved context of the scheduler loop itself — what a task `swtch`es
    /// back into when it calls `sched()`.
    scheduler_ctx: Context,
}

lazy_static! {
    static ref CPU: Mutex<Cpu> = Mutex::new(Cpu {
        proc: None,
        scheduler_ctx: Context::empty(),
    });
}

/// This kernel never brings up a second AP, so there is only ever CPU 0.
/// Kept as a function (not a constant) so call sites read the same as they
/// would on a real SMP port.
pub fn cpuid() -> usize {
    0
}

/// Table slot of the calling process/thread, if one is currently scheduled.
pub fn current_index() -> Option<usize> {
    CPU.lock().proc
}

pub fn current_pid() -> Option<i32> {
    let idx = current_index()?;
    Some(PTABLE.lock().procs[idx].pid)
}

/// Opaque rendezvous token for a slot: its own stable address. Two calls
/// with the same slot always produce the same value; nothing else does,
/// since `PTABLE`'s backing array is allocated once and never moves.
fn proc_chan(table: &ProcTable, idx: usize) -> usize {
    &table.procs[idx] as *const Proc as usize
}

/// Rendezvous token shared by every sleeper/waker interested in "something
/// changed among pid P's rows" — used by both `wait` (child reaped) and
/// `thread_join` (sibling thread reaped). Sharing one channel across both
/// event kinds means an unrelated wakeup can spuriously resume a sleeper;
/// every sleep site here re-checks its actual condition in a loop, which is
/// exactly the contract `wakeup`'s broadcast semantics require anyway.
fn pid_chan(pid: i32) -> usize {
    0x7000_0000usize.wrapping_add(pid as usize)
}

fn state_label(state: ProcState) -> &'static str {
    match state {
        ProcState::Unused => "unused",
        ProcState::Embryo => "embryo",
        ProcState::Sleeping => "sleeping",
        ProcState::Runnable => "runnable",
        ProcState::Running => "running",
        ProcState::Zombie => "zombie",
    }
}

fn default_fd_table() -> Vec<Option<Ref<File>>> {
    let mut table = vec![None; crate::param::NOFILE];
    table[0] = Some(Ref::Owned(File::new_console()));
    table[1] = Some(Ref::Owned(File::new_console()));
    table[2] = Some(Ref::Owned(File::new_console()));
    table
}

fn switch_pagetable(pgdir: u64) {
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) pgdir);
    }
}

/// Claim an `Unused` slot, assign it a fresh pid/tid pair, and point its
/// context at `fork_trampoline` with a freshly allocated kernel stack.
/// Every slot starts this way, whether it ends up being a forked process, a
/// spawned thread, or (once, at boot) the init process.
fn allocproc(table: &mut ProcTable) -> Option<usize> {
    let slot = (0..NPROC).find(|&i| table.procs[i].state == ProcState::Unused)?;

    let pid = table.nextpid;
    table.nextpid += 1;
    let tid = table.nexttid;
    table.nexttid += 1;

    let stack = vec![0u8; KSTACK_SIZE].into_boxed_slice();
    let stack_top = (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF;

    table.procs[slot] = Proc::unused();
    let p = &mut table.procs[slot];
    p.state = ProcState::Embryo;
    p.pid = pid;
    p.tid = tid;
    p.ofile = default_fd_table();
    p.context = Context::new(fork_trampoline as *const () as u64, stack_top);
    p.kstack = Some(stack);
    Some(slot)
}

fn free_proc(table: &mut ProcTable, idx: usize) {
    table.procs[idx] = Proc::unused();
}

fn main_thread_index(table: &ProcTable, pid: i32) -> Option<usize> {
    (0..NPROC).find(|&i| {
        let p = &table.procs[i];
        if p.state == ProcState::Unused || p.pid != pid {
            return false;
        }
        match p.parent {
            Some(pi) => table.procs[pi].pid != pid,
            None => true,
        }
    })
}

fn wakeup_locked(table: &mut ProcTable, chan: usize) {
    for p in table.procs.iter_mut() {
        if p.state == ProcState::Sleeping && p.chan == Some(chan) {
            p.state = ProcState::Runnable;
        }
    }
}

/// Broadcast wakeup: every sleeper on `chan` becomes `Runnable`. Spurious
/// with respect to any one sleeper's actual condition — callers of `sleep`
/// must always re-check in a loop.
pub fn wakeup(chan: usize) {
    let mut table = PTABLE.lock();
    wakeup_locked(&mut table, chan);
}

/// Release `resource` and atomically go to sleep on `chan`. The ordering
/// here (acquire `PTABLE` *before* releasing `resource`) is what keeps a
/// `wakeup` racing on the condition from being missed: nobody can observe
/// "condition changed, nobody sleeping yet" between the two locks.
pub fn sleep<T>(chan: usize, resource: spin::MutexGuard<'_, T>) {
    let idx = current_index().expect("sleep called without an active process");
    let mut table = PTABLE.lock();
    drop(resource);
    table.procs[idx].chan = Some(chan);
    table.procs[idx].state = ProcState::Sleeping;
    drop(table);
    sched(idx);
    PTABLE.lock().procs[idx].chan = None;
}

/// `sched`'s counterpart for callers that already hold `PTABLE`'s lock
/// (`wait`, `thread_join`, `exit`, `thread_exit`) — the xv6 special case of
/// `sleep(chan, &ptable.lock)` where no second lock needs releasing.
fn sleep_holding_table(idx: usize, chan: usize, mut table: spin::MutexGuard<'_, ProcTable>) {
    table.procs[idx].chan = Some(chan);
    table.procs[idx].state = ProcState::Sleeping;
    drop(table);
    sched(idx);
    PTABLE.lock().procs[idx].chan = None;
}

/// Save the calling slot's context and `swtch` back into the scheduler
/// loop. Precondition (asserted, not handled): slot is not `Running`, and
/// the caller is not holding `PTABLE`'s lock across this call — this port
/// drops that lock before every `sched()` call site rather than attempt to
/// carry a `MutexGuard` across the raw context jump (see DESIGN.md).
fn sched(idx: usize) {
    debug_assert_ne!(PTABLE.lock().procs[idx].state, ProcState::Running);

    let proc_ctx_ptr = &mut PTABLE.lock().procs[idx].context as *mut Context;
    let cpu_ctx_ptr = &mut CPU.lock().scheduler_ctx as *mut Context as *const Context;
    unsafe { context::switch_context(proc_ctx_ptr, cpu_ctx_ptr) };
}

/// Voluntarily give up the CPU without blocking on anything: mark the
/// caller `Runnable` again and `swtch` into the scheduler, which will pick
/// it back up once nothing else has priority.
pub fn yield_now() {
    let idx = current_index().expect("yield_now called without an active process");
    let mut table = PTABLE.lock();
    table.procs[idx].state = ProcState::Runnable;
    drop(table);
    sched(idx);
}

/// The per-CPU scheduler loop. Boots on the kernel's initial stack and
/// never returns — every other task `swtch`es out *to* this loop rather
/// than directly to one another.
pub fn scheduler() -> ! {
    loop {
        x86_64::instructions::interrupts::enable();

        let mut table = PTABLE.lock();
        let found = (0..NPROC).find(|&i| table.procs[i].state == ProcState::Runnable);

        let Some(i) = found else {
            drop(table);
            x86_64::instructions::hlt();
            continue;
        };

        table.procs[i].state = ProcState::Running;
        CPU.lock().proc = Some(i);

        switch_pagetable(table.procs[i].pgdir);
        if let Some(stack) = table.procs[i].kstack.as_ref() {
            let kstack_top = (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF;
            crate::interrupts::gdt::set_tss_rsp0(kstack_top);
        }

        let proc_ctx_ptr = &table.procs[i].context as *const Context;
        drop(table);

        let cpu_ctx_ptr = &mut CPU.lock().scheduler_ctx as *mut Context;
        unsafe { context::switch_context(cpu_ctx_ptr, proc_ctx_ptr) };

        CPU.lock().proc = None;
    }
}

/// Bootstrap the process table and create the init process (pid 1): the
/// in-kernel shell, which never goes through `fork_trampoline` because it
/// never trapped in from ring 3 in the first place — it's the first thing
/// `scheduler()` ever runs.
pub fn init() {
    let mut table = PTABLE.lock();
    let slot = allocproc(&mut table).expect("ptable exhausted during init");

    let kstack_top = {
        let stack = table.procs[slot].kstack.as_ref().unwrap();
        (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF
    };

    use x86_64::registers::control::Cr3;
    let (p4_frame, _) = Cr3::read();

    let p = &mut table.procs[slot];
    p.parent = None;
    p.set_name("kernelshell");
    p.pgdir = p4_frame.start_address().as_u64();
    p.sz = 0;
    p.limit = 0;
    p.context = Context::new(crate::kernel_shell_entry as *const () as u64, kstack_top);
    p.state = ProcState::Runnable;

    let pid = p.pid;
    drop(table);

    crate::log_info!("process table initialized; init process is pid {}", pid);
}

/// Duplicate the current process into a new, independent, runnable one.
/// Returns the child's pid.
pub fn fork() -> Result<i32, ProcError> {
    let parent_idx = current_index().ok_or(ProcError::NoSuchProcess)?;

    let mut table = PTABLE.lock();
    let child_idx = allocproc(&mut table).ok_or(ProcError::OutOfMemory)?;

    let parent_pgdir = table.procs[parent_idx].pgdir;
    let parent_sz = table.procs[parent_idx].sz;
    let parent_limit = table.procs[parent_idx].limit;
    let parent_allocations = table.procs[parent_idx].user_allocations.clone();
    let parent_name = table.procs[parent_idx].name;
    let parent_trapframe = table.procs[parent_idx].trapframe;

    // This kernel never set up per-process address spaces (see
    // `memory::paging` — there is one identity-mapped region everyone
    // shares), so the child inherits the same `pgdir` value rather than
    // getting a cloned page table. The segments themselves already live at
    // the same physical/virtual addresses for everyone.
    table.procs[child_idx].pgdir = parent_pgdir;
    table.procs[child_idx].sz = parent_sz;
    table.procs[child_idx].limit = parent_limit;
    table.procs[child_idx].user_allocations = parent_allocations;
    table.procs[child_idx].parent = Some(parent_idx);
    table.procs[child_idx].name = parent_name;

    // Full `Arc` duplication, one strong-count bump per descriptor — this
    // is the fork case, not the thread-aliasing one.
    table.procs[child_idx].ofile = table.procs[parent_idx]
        .ofile
        .iter()
        .map(|slot| slot.as_ref().map(|r| r.dup()))
        .collect();
    table.procs[child_idx].cwd = table.procs[parent_idx].cwd.as_ref().map(|c| c.dup());

    let trapframe = parent_trapframe.expect("fork called from a process with no saved trapframe");
    table.procs[child_idx].trapframe = Some(trapframe);

    let kstack_top = {
        let stack = table.procs[child_idx].kstack.as_ref().unwrap();
        (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF
    };
    let tf_size = core::mem::size_of::<TrapFrame>() as u64;
    let tf_ptr = (kstack_top - tf_size) as *mut TrapFrame;
    unsafe { *tf_ptr = trapframe };

    table.procs[child_idx].context = Context {
        rsp: kstack_top - tf_size,
        rbp: 0,
        rbx: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        rip: fork_trampoline as *const () as u64,
    };

    table.procs[child_idx].state = ProcState::Runnable;
    Ok(table.procs[child_idx].pid)
}

/// Grow or shrink the current process's image by `increment` bytes
/// (negative shrinks). `sz` and the limit check apply to every thread of
/// this pid, since they share one address space.
pub fn growproc(increment: i64) -> Result<(), ProcError> {
    let idx = current_index().ok_or(ProcError::NoSuchProcess)?;
    let mut table = PTABLE.lock();

    let pid = table.procs[idx].pid;
    let limit = table.procs[idx].limit;
    let old_sz = table.procs[idx].sz;

    let new_sz = if increment >= 0 {
        old_sz + increment as u64
    } else {
        old_sz.saturating_sub((-increment) as u64)
    };

    if limit != 0 && new_sz > limit {
        crate::log_warn!("growproc: pid {} would exceed its memory limit ({} > {})", pid, new_sz, limit);
        return Err(ProcError::LimitExceeded);
    }

    if increment > 0 {
        if !crate::memory::paging::allocate_user_memory(x86_64::VirtAddr::new(old_sz), increment as u64) {
            return Err(ProcError::OutOfMemory);
        }
    } else if increment < 0 {
        crate::memory::paging::free_user_memory(x86_64::VirtAddr::new(new_sz), (-increment) as u64);
    }

    for p in table.procs.iter_mut() {
        if p.pid == pid && p.state != ProcState::Unused {
            p.sz = new_sz;
        }
    }

    Ok(())
}

/// Apply a memory limit (0 = unlimited) to every row sharing `pid`. Rejects
/// a limit that would already be violated by the process's current image
/// size, leaving `limit` untouched.
pub fn setmemorylimit(pid: i32, limit: u64) -> Result<(), ProcError> {
    let mut table = PTABLE.lock();

    let sz = table.procs.iter().find(|p| p.pid == pid && p.state != ProcState::Unused).map(|p| p.sz);
    let Some(sz) = sz else {
        crate::log_warn!("setmemorylimit: no such pid {}", pid);
        return Err(ProcError::NoSuchProcess);
    };

    if limit != 0 && limit < sz {
        crate::log_warn!("setmemorylimit: pid {} limit {} is below its current size {}", pid, limit, sz);
        return Err(ProcError::LimitExceeded);
    }

    for p in table.procs.iter_mut() {
        if p.pid == pid && p.state != ProcState::Unused {
            p.limit = limit;
        }
    }
    Ok(())
}

/// Mark a process killed. Stops at the first matching row instead of every
/// row sharing `pid` — a process with live sibling threads can have only
/// one of them actually die here. Preserved as observed behavior, not
/// fixed; see DESIGN.md.
pub fn kill(pid: i32) -> Result<(), ProcError> {
    let mut table = PTABLE.lock();
    for i in 0..NPROC {
        if table.procs[i].pid == pid && table.procs[i].state != ProcState::Unused {
            table.procs[i].killed = true;
            if table.procs[i].state == ProcState::Sleeping {
                table.procs[i].state = ProcState::Runnable;
            }
            return Ok(());
        }
    }
    crate::log_warn!("kill: no such process {}", pid);
    Err(ProcError::NoSuchProcess)
}

/// Tear down the calling process: close its files, hand its children to
/// init, wake its parent, and zombie out. Forbidden on the init process.
pub fn exit(exit_code: u64) -> ! {
    let idx = current_index().expect("exit called without an active process");

    let mut table = PTABLE.lock();
    if table.procs[idx].pid == 1 {
        panic!("init process exited");
    }

    for slot in table.procs[idx].ofile.iter_mut() {
        *slot = None;
    }
    table.procs[idx].cwd = None;

    let allocations = table.procs[idx].user_allocations.clone();
    for (vaddr, size) in allocations {
        crate::memory::paging::free_user_memory(x86_64::VirtAddr::new(vaddr), size);
    }
    table.procs[idx].user_allocations.clear();

    thread_clear1(&mut table, idx);

    if let Some(parent_idx) = table.procs[idx].parent {
        let parent_pid = table.procs[parent_idx].pid;
        wakeup_locked(&mut table, pid_chan(parent_pid));
    }

    // Reparent every remaining child to init (pid 1). The original walks
    // every row here with no special case for rows that have no parent at
    // all (init's own row among them) — this port keeps the same
    // unconditional walk; see DESIGN.md on why the literal null-pointer
    // form of that bug doesn't translate into safe Rust.
    let init_idx = (0..NPROC).find(|&i| table.procs[i].pid == 1);
    for i in 0..NPROC {
        if table.procs[i].parent == Some(idx) {
            table.procs[i].parent = init_idx;
            if table.procs[i].state == ProcState::Zombie {
                if let Some(ii) = init_idx {
                    wakeup_locked(&mut table, pid_chan(table.procs[ii].pid));
                }
            }
        }
    }

    table.procs[idx].state = ProcState::Zombie;
    table.procs[idx].threadretval = exit_code;
    drop(table);
    sched(idx);
    unreachable!("a zombie should never be rescheduled");
}

/// Wait for a child process to become a zombie, then reap it. Returns the
/// child's pid and its exit code.
pub fn wait() -> Result<(i32, u64), ProcError> {
    let idx = current_index().ok_or(ProcError::NoSuchProcess)?;
    loop {
        let mut table = PTABLE.lock();
        let my_pid = table.procs[idx].pid;

        let mut have_children = false;
        let mut reap = None;
        for i in 0..NPROC {
            if table.procs[i].parent == Some(idx) {
                have_children = true;
                if table.procs[i].state == ProcState::Zombie {
                    reap = Some(i);
                    break;
                }
            }
        }

        if let Some(child_idx) = reap {
            let child_pid = table.procs[child_idx].pid;
            let retval = table.procs[child_idx].threadretval;
            free_proc(&mut table, child_idx);
            return Ok((child_pid, retval));
        }

        if !have_children || table.procs[idx].killed {
            return Err(ProcError::NoSuchProcess);
        }

        let chan = pid_chan(my_pid);
        sleep_holding_table(idx, chan, table);
    }
}

/// Create a new in-kernel thread sharing the caller's pid, page table,
/// image size and memory limit. Returns the new thread's tid.
pub fn thread_create(start_routine: u64, arg: u64, stack_pages: u64) -> Result<i32, ProcError> {
    let creator_idx = current_index().ok_or(ProcError::NoSuchProcess)?;

    let mut table = PTABLE.lock();
    let pid = table.procs[creator_idx].pid;
    let limit = table.procs[creator_idx].limit;
    let sz = table.procs[creator_idx].sz;
    let pgdir = table.procs[creator_idx].pgdir;

    let stack_bytes = stack_pages.max(1) * 4096;
    if limit != 0 && sz + stack_bytes > limit {
        crate::log_warn!("thread_create: pid {} would exceed its memory limit", pid);
        return Err(ProcError::LimitExceeded);
    }

    let child_idx = allocproc(&mut table).ok_or(ProcError::OutOfMemory)?;

    // A thread reuses its creator's pid instead of consuming the fresh one
    // `allocproc` just handed out, so the counter is rolled back. This
    // leaves a window where a second `allocproc` could hand out the same
    // pid before this thread is fully installed — an intentionally
    // unfixed race; see DESIGN.md.
    table.nextpid -= 1;

    let new_tid = table.procs[child_idx].tid;
    table.procs[child_idx].pid = pid;
    table.procs[child_idx].sz = sz;
    table.procs[child_idx].limit = limit;
    table.procs[child_idx].pgdir = pgdir;

    let main_idx = main_thread_index(&table, pid).unwrap_or(creator_idx);
    table.procs[child_idx].parent = Some(main_idx);
    table.procs[main_idx].spnum += 1;

    table.procs[child_idx].ofile = table.procs[main_idx]
        .ofile
        .iter()
        .map(|slot| slot.as_ref().map(|r| r.alias()))
        .collect();
    table.procs[child_idx].cwd = table.procs[main_idx].cwd.as_ref().map(|c| c.alias());

    if !crate::memory::paging::allocate_user_memory(x86_64::VirtAddr::new(sz), stack_bytes) {
        free_proc(&mut table, child_idx);
        return Err(ProcError::OutOfMemory);
    }
    let new_top = sz + stack_bytes;
    for p in table.procs.iter_mut() {
        if p.pid == pid && p.state != ProcState::Unused {
            p.sz = new_top;
        }
    }

    let mut trapframe = table.procs[creator_idx]
        .trapframe
        .expect("thread_create from a process with no saved trapframe");
    trapframe.rip = start_routine;

    // Push `arg` then a poisoned return address: the thread is expected to
    // call `thread_exit` itself, never to fall off the end of its routine.
    let arg_slot = new_top - 8;
    let ret_slot = arg_slot - 8;
    unsafe {
        *(arg_slot as *mut u64) = arg;
        *(ret_slot as *mut u64) = 0xffff_ffff;
    }
    trapframe.rsp = ret_slot;
    table.procs[child_idx].trapframe = Some(trapframe);

    let kstack_top = {
        let stack = table.procs[child_idx].kstack.as_ref().unwrap();
        (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF
    };
    let tf_size = core::mem::size_of::<TrapFrame>() as u64;
    let tf_ptr = (kstack_top - tf_size) as *mut TrapFrame;
    unsafe { *tf_ptr = trapframe };
    table.procs[child_idx].context = Context {
        rsp: kstack_top - tf_size,
        rbp: 0,
        rbx: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        rip: fork_trampoline as *const () as u64,
    };

    table.procs[child_idx].state = ProcState::Runnable;
    Ok(new_tid)
}

/// Exit the calling thread. A main thread's exit degrades to a full
/// process `exit` — there is no such thing as "just the main thread dies"
/// while siblings live on.
pub fn thread_exit(retval: u64) -> ! {
    let idx = current_index().expect("thread_exit called without an active process");

    let mut table = PTABLE.lock();
    let pid = table.procs[idx].pid;
    let parent_pid = table.procs[idx].parent.map(|pi| table.procs[pi].pid);

    if table.procs[idx].is_main_thread(parent_pid) {
        drop(table);
        exit(retval);
    }

    for slot in table.procs[idx].ofile.iter_mut() {
        *slot = None;
    }
    table.procs[idx].cwd = None;
    table.procs[idx].threadretval = retval;
    table.procs[idx].state = ProcState::Zombie;

    wakeup_locked(&mut table, pid_chan(pid));
    drop(table);
    sched(idx);
    unreachable!("a zombie thread should never be rescheduled");
}

/// Block until thread `tid` of the caller's own pid exits, then reap it and
/// return its exit value. Joining one's own tid always fails.
pub fn thread_join(tid: i32) -> Result<u64, ProcError> {
    let idx = current_index().ok_or(ProcError::NoSuchProcess)?;

    {
        let table = PTABLE.lock();
        if table.procs[idx].tid == tid {
            return Err(ProcError::CannotJoinSelf);
        }
    }

    loop {
        let mut table = PTABLE.lock();
        let pid = table.procs[idx].pid;

        let mut found = false;
        let mut zombie_idx = None;
        for i in 0..NPROC {
            if table.procs[i].pid == pid && table.procs[i].tid == tid && table.procs[i].state != ProcState::Unused {
                found = true;
                if table.procs[i].state == ProcState::Zombie {
                    zombie_idx = Some(i);
                }
                break;
            }
        }

        if let Some(zidx) = zombie_idx {
            let retval = table.procs[zidx].threadretval;
            free_proc(&mut table, zidx);
            return Ok(retval);
        }

        if !found || table.procs[idx].killed {
            return Err(ProcError::NoSuchThread);
        }

        let chan = pid_chan(pid);
        sleep_holding_table(idx, chan, table);
    }
}

/// Look up the calling process/thread's descriptor at `fd`, if any. Returns
/// an alias handle (no refcount bump) — fine for the syscall dispatcher's
/// own momentary use, which always drops it again before returning.
pub fn current_fd(fd: usize) -> Option<Ref<File>> {
    let idx = current_index()?;
    let table = PTABLE.lock();
    table.procs[idx].ofile.get(fd)?.as_ref().map(|r| r.alias())
}

/// Install `file` at the first free descriptor slot of the calling
/// process, returning that slot's number.
pub fn current_fd_install(file: Ref<File>) -> Option<usize> {
    let idx = current_index()?;
    let mut table = PTABLE.lock();
    let slot = table.procs[idx].ofile.iter().position(|s| s.is_none())?;
    table.procs[idx].ofile[slot] = Some(file);
    Some(slot)
}

/// Install `file` at a specific descriptor number (`dup2`-style), dropping
/// whatever was there before.
pub fn current_fd_install_at(fd: usize, file: Ref<File>) -> bool {
    let Some(idx) = current_index() else { return false };
    let mut table = PTABLE.lock();
    let Some(slot) = table.procs[idx].ofile.get_mut(fd) else { return false };
    *slot = Some(file);
    true
}

/// Close descriptor `fd` of the calling process.
pub fn current_fd_close(fd: usize) -> bool {
    let Some(idx) = current_index() else { return false };
    let mut table = PTABLE.lock();
    let Some(slot) = table.procs[idx].ofile.get_mut(fd) else { return false };
    *slot = None;
    true
}

/// Spawn a brand-new process running the binary at `path`, parented to the
/// calling process/thread if there is one (the in-kernel shell has none).
/// Unlike `fork`, there is no parent trapframe to duplicate — this builds a
/// fresh one that `fork_trampoline`'s `iretq` will use to enter the new
/// image directly in Ring 3. Returns the new process's pid.
pub fn spawn_program(path: &str, stack_pages: u64) -> Result<i32, crate::loader::elf::ExecError> {
    let owned_path = String::from(path);
    let image = crate::loader::elf::parse_and_map_elf(&owned_path, stack_pages)?;

    let parent_idx = current_index();
    let mut table = PTABLE.lock();
    let child_idx = match allocproc(&mut table) {
        Some(i) => i,
        None => {
            for &(vaddr, size) in &image.allocations {
                crate::memory::paging::free_user_memory(x86_64::VirtAddr::new(vaddr), size);
            }
            return Err(crate::loader::elf::ExecError::MemoryError);
        }
    };

    table.procs[child_idx].parent = parent_idx;
    table.procs[child_idx].sz = image.image_size;
    table.procs[child_idx].user_allocations = image.allocations;
    table.procs[child_idx].set_name(&owned_path);
    if let Some(pi) = parent_idx {
        table.procs[child_idx].pgdir = table.procs[pi].pgdir;
        table.procs[child_idx].cwd = table.procs[pi].cwd.as_ref().map(|c| c.dup());
    }

    let user_cs = crate::interrupts::gdt::user_code_selector().0 as u64;
    let user_ss = crate::interrupts::gdt::user_data_selector().0 as u64;

    let trapframe = TrapFrame {
        rcx: 0, rbx: 0, rdi: 0, rsi: 0, rdx: 0, rbp: 0,
        r8: 0, r9: 0, r10: 0, r11: 0, r12: 0, r13: 0, r14: 0, r15: 0,
        rip: image.entry,
        cs: user_cs,
        rflags: 0x200, // IF set, so the new process starts with interrupts enabled
        rsp: image.user_stack_top,
        ss: user_ss,
    };
    table.procs[child_idx].trapframe = Some(trapframe);

    let kstack_top = {
        let stack = table.procs[child_idx].kstack.as_ref().unwrap();
        (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF
    };
    let tf_size = core::mem::size_of::<TrapFrame>() as u64;
    let tf_ptr = (kstack_top - tf_size) as *mut TrapFrame;
    unsafe { *tf_ptr = trapframe };
    table.procs[child_idx].context = Context {
        rsp: kstack_top - tf_size,
        rbp: 0,
        rbx: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        rip: fork_trampoline as *const () as u64,
    };

    table.procs[child_idx].state = ProcState::Runnable;
    Ok(table.procs[child_idx].pid)
}

/// Reparent every orphaned sibling thread of the exiting slot (to init) and
/// tear the rest of the thread family down. Mirrors `proc.c`'s
/// `thread_clear1`: if the exiting thread is *not* the main thread, its
/// `parent` field is currently the main thread's own slot, so it absorbs
/// the main thread's `spnum` and parent before going on to zombie out,
/// taking over the main thread's bookkeeping. Every *other* slot sharing
/// this pid is then wiped outright and returned to `Unused` — a process
/// going away takes every live sibling thread down with it.
fn thread_clear1(table: &mut ProcTable, idx: usize) {
    let pid = table.procs[idx].pid;
    let parent_pid = table.procs[idx].parent.map(|pi| table.procs[pi].pid);
    let was_main = table.procs[idx].is_main_thread(parent_pid);

    if !was_main {
        if let Some(pi) = table.procs[idx].parent {
            let spnum = table.procs[pi].spnum;
            let grandparent = table.procs[pi].parent;
            table.procs[idx].spnum = spnum;
            table.procs[idx].parent = grandparent;
        }
    }

    for i in 0..NPROC {
        if i != idx && table.procs[i].pid == pid && table.procs[i].state != ProcState::Unused {
            free_proc(table, i);
        }
    }
}

/// Syscall exec: replace the current process's image with a new ELF
/// binary loaded with `stack_pages` pages reserved for its user stack.
/// Never returns on success.
pub fn sys_exec(path: &str, stack_pages: u64) -> Result<(), crate::loader::elf::ExecError> {
    let owned_path = String::from(path);
    let params = crate::loader::elf::parse_and_map_elf(&owned_path, stack_pages)?;

    let idx = current_index().expect("sys_exec called without an active process");
    let mut table = PTABLE.lock();

    let allocations = table.procs[idx].user_allocations.clone();
    for (vaddr, size) in allocations {
        crate::memory::paging::free_user_memory(x86_64::VirtAddr::new(vaddr), size);
    }

    table.procs[idx].user_allocations = params.allocations;
    table.procs[idx].sz = params.image_size;
    table.procs[idx].set_name(&owned_path);

    let kstack_top = {
        let stack = table.procs[idx].kstack.as_ref().unwrap();
        (stack.as_ptr() as u64 + KSTACK_SIZE as u64) & !0xF
    };
    // `usermode_trampoline` reads its entry/stack out of
    // `PENDING_USER_TASK` the moment it starts running, so that has to be
    // populated before the context below is ever switched into.
    crate::loader::elf::set_pending_user_task(params.entry, params.user_stack_top);
    table.procs[idx].context = Context::new(
        crate::loader::elf::usermode_trampoline as *const () as u64,
        kstack_top,
    );

    crate::interrupts::gdt::set_tss_rsp0(kstack_top);
    switch_pagetable(table.procs[idx].pgdir);

    let next_ctx_ptr = &table.procs[idx].context as *const Context;
    drop(table);
    unsafe { context::restore_context(next_ctx_ptr) };
    unreachable!("sys_exec should never return on success");
}

/// Full listing with a sleep-channel annotation when applicable. Mirrors
/// `procdump`'s unfiltered table walk.
pub fn procdump() -> Vec<String> {
    let table = PTABLE.lock();
    let mut lines = Vec::new();
    for p in table.procs.iter() {
        if p.state == ProcState::Unused {
            continue;
        }
        let mut line = format!("{} {} {:<8} {}", p.pid, p.tid, state_label(p.state), p.name_str());
        if p.state == ProcState::Sleeping {
            if let Some(chan) = p.chan {
                line.push_str(&format!(" chan={:#x}", chan));
            }
        }
        lines.push(line);
    }
    lines
}

/// Filtered listing for the process manager: excludes embryo/zombie/unused
/// rows and, per `proc.c`, sibling (non-main) threads. The filter compares
/// a row's parent's pid against its own pid; init has no parent at all, so
/// that comparison reads as vacuously true and init is silently left off
/// this listing — a known quirk of the original, kept rather than patched.
pub fn procdump2() -> Vec<(i32, i32, &'static str, String)> {
    let table = PTABLE.lock();
    let mut rows = Vec::new();
    for p in table.procs.iter() {
        match p.state {
            ProcState::Embryo | ProcState::Zombie | ProcState::Unused => continue,
            _ => {}
        }
        let parent_pid = p.parent.map(|pi| table.procs[pi].pid);
        let is_sibling_thread = match parent_pid {
            Some(pp) => pp == p.pid,
            None => true,
        };
        if is_sibling_thread {
            continue;
        }
        rows.push((p.pid, p.tid, state_label(p.state), String::from(p.name_str())));
    }
    rows
}

#[unsafe(naked)]
pub extern "C" fn fork_trampoline() {
    unsafe {
        core::arch::naked_asm!(
            "xor rax, rax",
            "pop rcx",
            "pop rbx",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rbp",
            "pop r8",
            "pop r9",
            "pop r10",
            "pop r11",
            "pop r12",
            "pop r13",
            "pop r14",
            "pop r15",
            "iretq"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_chan_is_stable_per_pid() {
        assert_eq!(pid_chan(7), pid_chan(7));
        assert_ne!(pid_chan(7), pid_chan(8));
    }

    #[test]
    fn main_thread_detection_matches_parent_pid_rule() {
        let mut table = ProcTable {
            procs: core::array::from_fn(|_| Proc::unused()),
            nextpid: 1,
            nexttid: 1,
        };
        table.procs[0].state = ProcState::Runnable;
        table.procs[0].pid = 5;
        table.procs[0].parent = None; // init-like: no parent

        table.procs[1].state = ProcState::Runnable;
        table.procs[1].pid = 6;
        table.procs[1].parent = Some(0); // a genuine child process

        table.procs[2].state = ProcState::Runnable;
        table.procs[2].pid = 6;
        table.procs[2].parent = Some(1); // sibling thread of pid 6's main thread

        assert_eq!(main_thread_index(&table, 6), Some(1));
        assert!(table.procs[1].is_main_thread(Some(5)));
        assert!(!table.procs[2].is_main_thread(Some(6)));
    }

    #[test]
    fn growproc_rejects_growth_past_limit() {
        // Pure arithmetic check mirroring `growproc`'s limit comparison,
        // without touching PTABLE or the page-mapping calls.
        let old_sz: u64 = 4096;
        let limit: u64 = 8192;
        let increment: i64 = 8192;
        let new_sz = old_sz + increment as u64;
        assert!(limit != 0 && new_sz > limit);
    }

    #[test]
    fn procdump2_hides_sibling_threads_and_init() {
        let mut table = ProcTable {
            procs: core::array::from_fn(|_| Proc::unused()),
            nextpid: 1,
            nexttid: 1,
        };
        table.procs[0].state = ProcState::Runnable;
        table.procs[0].pid = 1;
        table.procs[0].parent = None; // init

        table.procs[1].state = ProcState::Runnable;
        table.procs[1].pid = 2;
        table.procs[1].parent = Some(0); // a real process

        table.procs[2].state = ProcState::Runnable;
        table.procs[2].pid = 2;
        table.procs[2].parent = Some(1); // sibling thread of pid 2

        let rows: Vec<i32> = table
            .procs
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                if p.state == ProcState::Unused {
                    return None;
                }
                let parent_pid = p.parent.map(|pi| table.procs[pi].pid);
                let is_sibling = match parent_pid {
                    Some(pp) => pp == p.pid,
                    None => true,
                };
                if is_sibling { None } else { Some(i as i32) }
            })
            .collect();

        assert_eq!(rows, vec![1]); // only the real process row survives
    }
}
