pub mod commands;
pub mod state;

use alloc::vec::Vec;
use crate::println;

/// Parse input line into command + arguments, then dispatch.
pub fn exec_command(input: &str) {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return;
    }

    let mut parts: Vec<&str> = trimmed.splitn(2, ' ').collect();
    let cmd = parts.remove(0);
    let args = if parts.is_empty() { "" } else { parts[0] };

    match cmd {
        "ls"        => commands::ls::run(args),
        "cat"       => commands::cat::run(args),
        "catbin"    => commands::catbin::run(args),
        "cd"        => commands::cd::run(args),
        "cp"        => commands::cp::run(args),
        "mv"        => commands::mv::run(args),
        "rm"        => commands::rm::run(args),
        "mkdir"     => commands::mkdir::run(args),
        "touch"     => commands::touch::run(args),
        "write"     => commands::write::run(args),
        "help"      => commands::help::run(args),
        "date"      => commands::date::run(args),
        "uptime"    => commands::uptime::run(args),
        "version"   => commands::version::run(args),
        "neofetch"  => commands::neofetch::run(args),
        "log"       => commands::log::run(args),
        "objdump"   => commands::objdump::run(args),
        "vfstest"   => commands::vfstest::run(args),
        "atatest"   => commands::atatest::run(args),
        "shellscript" => commands::shellscript::run(args),
        "yield"     => commands::yield_cmd::run(args),
        // Process manager surface.
        "list"      => commands::list::run(args),
        "kill"      => commands::kill::run(args),
        "execute"   => commands::execute::run(args),
        "memlim"    => commands::memlim::run(args),
        "exit"      => commands::exit_cmd::run(args),
        _           => println!("{}: command not found", cmd),
    }
}
