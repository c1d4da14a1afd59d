use crate::println;

pub fn run(_args: &str) {
    println!("AtomicOS Shell - Available commands:");
    println!("");
    println!("  ls [dir]          List files in directory");
    println!("  cat <file>        Show file contents");
    println!("  cd <dir>          Change working directory");
    println!("  help              Show this help message");
    println!("  date              Show current date/time (RTC)");
    println!("  uptime            Show time since boot");
    println!("  version           Show kernel version");
    println!("  neofetch          Show system info with logo");
    println!("");
    println!("  mkdir <name>      Create a directory");
    println!("  touch <path>      Create an empty file");
    println!("  write <path> ..   Write text to a file");
    println!("  rm <path>         Remove a file or directory");
    println!("  cp <src> <dst>    Copy a file");
    println!("  mv <src> <dst>    Move/rename a file");
    println!("  catbin <addr>     Hex dump memory at address");
    println!("  objdump           Inspect kernel ELF info");
    println!("  vfstest           Exercise the in-memory filesystem");
    println!("  atatest           Exercise the ATA/PIO disk driver");
    println!("  shellscript <..>  Run commands separated by ;");
    println!("  log [n]           Show last n kernel log entries");
    println!("");
    println!("  list              Dump the process table");
    println!("  kill <pid>        Terminate a process");
    println!("  execute <path> <stack_pages>   Launch a managed process");
    println!("  memlim <pid> <bytes>           Cap a process's image size");
    println!("  yield             Give up the CPU to the next runnable process");
    println!("  exit              Leave the console (pid 1 cannot exit)");
}
