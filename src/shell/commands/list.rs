use crate::println;

/// list — filtered process listing, as a real process manager's operator
/// console would show it: no embryo/zombie rows, no sibling threads. See
/// `scheduler::procdump2` for the inherited quirk where this also hides the
/// process manager's own row.
pub fn run(_args: &str) {
    let rows = crate::scheduler::procdump2();
    println!("  PID  TID  STATE      NAME");
    println!("  ---  ---  ---------  ----");
    for (pid, tid, state, name) in &rows {
        println!("  {:>3}  {:>3}  {:9}  {}", pid, tid, state, name);
    }
}
