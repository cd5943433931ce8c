// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::env;
use std::io::{self, Write};
use std::process;

use minidump_dumper::*;

const USAGE: &str = "Usage: dumper_info <pid> [<core> <procfs dir>]";

fn print_dumper_info<D: LinuxDumper>(mut dumper: D) -> Result<(), DumperError> {
    dumper.init()?;
    dumper.threads_suspend()?;
    let stdout = &mut io::stdout();
    let printed = dumper.print(stdout).and_then(|_| stdout.flush());
    dumper.threads_resume()?;
    if let Err(e) = printed {
        eprintln!("Error writing output: {}", e);
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<_> = env::args_os().skip(1).collect();
    let pid = match args.first().and_then(|arg| arg.to_str()?.parse::<i32>().ok()) {
        Some(pid) => pid,
        None => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    let result = match &args[1..] {
        [] => live_dumper(pid),
        [core, procfs] => print_dumper_info(CoreDumper::new(pid, core, procfs)),
        _ => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };
    if let Err(e) = result {
        eprintln!("Error inspecting process {}: {}", pid, e);
        process::exit(1);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn live_dumper(pid: i32) -> Result<(), DumperError> {
    print_dumper_info(PtraceDumper::new(pid))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn live_dumper(_pid: i32) -> Result<(), DumperError> {
    Err(DumperError::UnsupportedArchitecture)
}
