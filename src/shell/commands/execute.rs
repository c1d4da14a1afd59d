use crate::println;

/// execute <path> <stack_pages> — fork a new managed process and load an
/// ELF64 binary into it with `stack_pages` pages of user stack. Mirrors
/// `pmanager.c`'s `execute` branch: the console itself keeps running
/// either way, the child only ever reports the failure case, and success
/// produces no output at all.
pub fn run(args: &str) {
    let mut parts = args.split_whitespace();
    let (path, stack_pages) = match (parts.next(), parts.next().map(|s| s.parse::<u64>())) {
        (Some(p), Some(Ok(n))) => (p, n),
        _ => {
            println!("execute fail.");
            return;
        }
    };

    if crate::scheduler::spawn_program(path, stack_pages).is_err() {
        println!("execute fail.");
    }
}
