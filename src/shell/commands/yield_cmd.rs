use crate::println;

/// yield — cooperatively yield to the next ready task.
pub fn run(_args: &str) {
    println!("yield: switching to the next runnable process...");
    crate::scheduler::yield_now();
}
