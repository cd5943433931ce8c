// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Introspection of crashed Linux processes, for writing minidumps.
//!
//! A [`LinuxDumper`] gathers what a minidump writer needs to know about a
//! process: its threads and their registers, its memory mappings with a
//! module identifier for each, its stacks and its memory. Two dumpers are
//! provided:
//!
//! * [`PtraceDumper`] inspects a live process through ptrace and `/proc`.
//! * [`CoreDumper`] inspects a core file together with a saved copy of the
//!   crashed process's procfs directory.
//!
//! ```no_run
//! use minidump_dumper::{CoreDumper, LinuxDumper};
//!
//! # fn main() -> Result<(), minidump_dumper::DumperError> {
//! let mut dumper = CoreDumper::new(1234, "core", "proc/1234");
//! dumper.init()?;
//! for index in 0..dumper.mappings().len() {
//!     if let Some(id) = dumper.elf_identifier_for_mapping_index(index) {
//!         println!("{} {}", dumper.mappings()[index].name, id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate scroll;

pub mod auxv;
pub mod context;
mod core_dumper;
pub mod core_file;
mod dumper;
pub mod elf;
mod errors;
mod file_id;
pub mod maps;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod ptrace_dumper;
mod thread_info;

pub use crate::context::{Cpu, FpRegisters, GeneralRegisters};
pub use crate::core_dumper::CoreDumper;
pub use crate::core_file::CoreFile;
pub use crate::dumper::*;
pub use crate::errors::*;
pub use crate::file_id::*;
pub use crate::maps::MemoryMapping;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::ptrace_dumper::PtraceDumper;
pub use crate::thread_info::*;
