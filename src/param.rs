//! Compile-time sizing for the process/thread core.
//!
//! Mirrors xv6's `param.h`: fixed bounds instead of dynamic growth, so the
//! process table can be a plain array guarded by one lock.

/// Maximum number of CPUs the per-CPU scheduler state is sized for.
///
/// The `bootloader` crate brings up exactly one AP in this kernel (there is
/// no SMP bring-up path anywhere in this tree), so this is 1 in practice.
/// The scheduler and `Cpu` table are still generalized over `NCPU` so a
/// second core is a bring-up change, not a scheduler rewrite.
pub const NCPU: usize = 1;

/// Number of slots in the process table.
pub const NPROC: usize = 64;

/// Number of open-file slots per process, aliased (not refcounted) by
/// sibling threads.
pub const NOFILE: usize = 16;

/// Max length of a `Proc::name`, including the NUL the console printer
/// appends when the name isn't already short enough to need none.
pub const PROC_NAME_MAX: usize = 16;

/// Size in bytes of one kernel stack: exactly one page, per the TCB's
/// `kstack` field description.
pub const KSTACK_SIZE: usize = 4096;
