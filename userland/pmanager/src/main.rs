//! Freestanding process-manager console.
//!
//! A line-oriented command loop reading from fd 0 and driving the same
//! five commands as the shell's own `list`/`kill`/`execute`/`memlim`/`exit`
//! built-ins, but entirely through the raw syscall ABI (`atomiclibc`)
//! instead of calling into the kernel directly. Command parsing and the
//! exact success/failure wording mirror the original console tool this
//! kernel's process table is modeled on.

#![no_std]
#![no_main]

use atomiclibc::{STDIN, entry_point, println};

const CMD_LEN: usize = 100;
const MAX_ARGS: usize = 10;

entry_point!(pmanager_main);

fn pmanager_main() -> i32 {
    let mut line = [0u8; CMD_LEN];

    loop {
        let n = read_line(&mut line);
        let args = split_args(&line[..n]);

        if args[0].is_empty() {
            continue;
        }

        match args[0] {
            b"list" => {
                let n = atomiclibc::procdump2_count();
                println!("{} live process table rows", n);
            }
            b"kill" => {
                let pid = parse_i32(arg(&args, 1));
                if atomiclibc::kill(pid) == 0 {
                    println!("kill success.");
                } else {
                    println!("kill fail.");
                }
            }
            b"execute" => {
                let path = core::str::from_utf8(arg(&args, 1)).unwrap_or("");
                let stack_pages = parse_i32(arg(&args, 2)).max(1) as u64;
                // `exec2` already forks the child for us; the console
                // keeps running in the parent either way.
                if atomiclibc::exec2(path, stack_pages) == -1 {
                    println!("execute fail.");
                }
            }
            b"memlim" => {
                let pid = parse_i32(arg(&args, 1));
                let limit = parse_i32(arg(&args, 2)).max(0) as u64;
                if atomiclibc::setmemorylimit(pid, limit) == 0 {
                    println!("memlim success.");
                } else {
                    println!("memlim fail.");
                }
            }
            b"exit" => break,
            _ => {}
        }
    }

    0
}

/// Accumulates bytes off fd 0 until a newline or the buffer fills.
/// Returns the number of bytes before the newline. The kernel's console
/// device has no line discipline yet (every read hands back a single
/// `\n`), so in practice this returns an empty line on real hardware —
/// it exists to exercise `SYS_READ` the same way a future TTY would feed
/// it.
fn read_line(buf: &mut [u8]) -> usize {
    let mut byte = [0u8; 1];
    let mut i = 0;
    while i < buf.len() {
        let got = atomiclibc::read(STDIN, &mut byte);
        if got == 0 || got == u64::MAX {
            break;
        }
        if byte[0] == b'\n' || byte[0] == b'\r' {
            break;
        }
        buf[i] = byte[0];
        i += 1;
    }
    i
}

fn split_args(line: &[u8]) -> [&[u8]; MAX_ARGS] {
    let mut args: [&[u8]; MAX_ARGS] = [&[]; MAX_ARGS];
    let mut count = 0;
    let mut start = 0;
    let mut i = 0;
    while i <= line.len() && count < MAX_ARGS {
        let at_end = i == line.len();
        if at_end || line[i] == b' ' {
            if i > start {
                args[count] = &line[start..i];
                count += 1;
            }
            start = i + 1;
        }
        i += 1;
    }
    // Re-slice down to the populated prefix by returning a fixed array and
    // letting callers treat empty slices past `count` as absent args.
    args
}

fn arg<'a>(args: &[&'a [u8]; MAX_ARGS], idx: usize) -> &'a [u8] {
    args.get(idx).copied().unwrap_or(&[])
}

fn parse_i32(s: &[u8]) -> i32 {
    let mut neg = false;
    let mut val: i32 = 0;
    let mut rest = s;
    if let Some((&b'-', tail)) = s.split_first() {
        neg = true;
        rest = tail;
    }
    for &b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        val = val.saturating_mul(10).saturating_add((b - b'0') as i32);
    }
    if neg { -val } else { val }
}
