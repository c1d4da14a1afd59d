use crate::println;

/// exit — the process manager's console runs as the kernel's init process
/// (pid 1), which must never exit (`scheduler::exit` panics on it), so
/// there is nothing safe for this command to do beyond saying so.
pub fn run(_args: &str) {
    println!("exit: the process manager console cannot exit (it is pid 1)");
}
