use crate::println;

/// kill <pid> — terminate a process. Mirrors the documented quirk in
/// `scheduler::kill`: only the first table row matching `pid` is marked
/// killed, so a process with live sibling threads can still have one of
/// them survive this call.
pub fn run(args: &str) {
    let pid_str = args.trim();
    if pid_str.is_empty() {
        println!("kill fail.");
        return;
    }

    let pid: i32 = match pid_str.parse() {
        Ok(v) => v,
        Err(_) => { println!("kill fail."); return; }
    };

    match crate::scheduler::kill(pid) {
        Ok(()) => println!("kill success."),
        Err(_) => println!("kill fail."),
    }
}
