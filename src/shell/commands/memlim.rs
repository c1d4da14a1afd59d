use crate::println;

/// memlim <pid> <bytes> — cap a process's image size; 0 clears the limit.
/// Rejects (and leaves the limit untouched) if `bytes` is below the
/// process's current image size.
pub fn run(args: &str) {
    let mut parts = args.split_whitespace();
    let (pid, limit) = match (
        parts.next().map(|s| s.parse::<i32>()),
        parts.next().map(|s| s.parse::<u64>()),
    ) {
        (Some(Ok(pid)), Some(Ok(limit))) => (pid, limit),
        _ => {
            println!("memlim fail.");
            return;
        }
    };

    match crate::scheduler::setmemorylimit(pid, limit) {
        Ok(()) => println!("memlim success."),
        Err(_) => println!("memlim fail."),
    }
}
