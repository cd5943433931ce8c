// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The interface shared by the live process and core file dumpers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use scroll::Endian;
use tracing::{debug, warn};

use crate::auxv::{self, AuxvInfo};
use crate::elf::{self, ElfClass};
use crate::errors::{DumperError, MapsError};
use crate::file_id::FileId;
use crate::maps::{self, MemoryMapping};
use crate::thread_info::ThreadInfo;

/// How much stack is captured for each thread.
pub const STACK_TO_CAPTURE: u64 = 32 * 1024;

/// State shared by every dumper.
#[derive(Clone, Debug, Default)]
pub struct DumperBase {
    pub pid: i32,
    pub threads: Vec<i32>,
    pub mappings: Vec<MemoryMapping>,
    pub auxv: AuxvInfo,
    pub crash_thread: Option<i32>,
    pub crash_signal: Option<i32>,
    pub crash_address: Option<u64>,
}

impl DumperBase {
    pub fn new(pid: i32) -> DumperBase {
        DumperBase {
            pid,
            ..DumperBase::default()
        }
    }
}

/// The page size of the host.
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Introspection of a crashed process, either still alive or as a core file.
///
/// Implementations provide thread enumeration and memory access; mapping
/// enumeration, stack bounds and module identifiers are shared.
pub trait LinuxDumper {
    fn base(&self) -> &DumperBase;
    fn base_mut(&mut self) -> &mut DumperBase;

    /// Enumerate threads, then mappings. Both must succeed.
    fn init(&mut self) -> Result<(), DumperError>;

    /// True if the target is a core file rather than a live process.
    fn is_post_mortem(&self) -> bool;

    fn threads_suspend(&mut self) -> Result<(), DumperError>;
    fn threads_resume(&mut self) -> Result<(), DumperError>;

    /// The thread at `index` of [`threads`](LinuxDumper::threads) with its registers.
    fn thread_info_by_index(&self, index: usize) -> Result<ThreadInfo, DumperError>;

    /// Read `length` bytes of the target's memory at `address`.
    fn copy_from_process(&self, address: u64, length: usize) -> Result<Vec<u8>, DumperError>;

    /// The path of `node` in the target's procfs directory.
    fn proc_path(&self, node: &str) -> PathBuf;

    fn pid(&self) -> i32 {
        self.base().pid
    }

    fn threads(&self) -> &[i32] {
        &self.base().threads
    }

    fn mappings(&self) -> &[MemoryMapping] {
        &self.base().mappings
    }

    fn auxv(&self) -> &AuxvInfo {
        &self.base().auxv
    }

    fn crash_thread(&self) -> Option<i32> {
        self.base().crash_thread
    }

    fn set_crash_thread(&mut self, tid: i32) {
        self.base_mut().crash_thread = Some(tid);
    }

    fn crash_signal(&self) -> Option<i32> {
        self.base().crash_signal
    }

    fn set_crash_signal(&mut self, signal: i32) {
        self.base_mut().crash_signal = Some(signal);
    }

    fn crash_address(&self) -> Option<u64> {
        self.base().crash_address
    }

    fn set_crash_address(&mut self, address: u64) {
        self.base_mut().crash_address = Some(address);
    }

    fn page_size(&self) -> u64 {
        page_size()
    }

    /// Read the target's auxiliary vector from procfs. A missing or unreadable
    /// vector leaves the vDSO and entry point unknown.
    fn read_auxv(&mut self, class: ElfClass, endian: Endian) {
        let path = self.proc_path("auxv");
        let info = match fs::read(&path) {
            Ok(data) => auxv::read_auxv(&data, class, endian),
            Err(e) => {
                warn!("failed to read {}: {}", path.display(), e);
                AuxvInfo::default()
            }
        };
        self.base_mut().auxv = info;
    }

    /// Build the mapping list from the target's procfs `maps`.
    fn enumerate_mappings(&mut self) -> Result<(), DumperError> {
        let path = self.proc_path("maps");
        let data = fs::read(&path).map_err(|e| {
            warn!("failed to read {}: {}", path.display(), e);
            MapsError::MapsUnreadable
        })?;
        let mappings = maps::parse_maps(&data, self.auxv());
        if mappings.is_empty() {
            return Err(MapsError::NoMappings.into());
        }
        debug!("found {} mappings", mappings.len());
        self.base_mut().mappings = mappings;
        Ok(())
    }

    /// The first mapping containing `address`.
    fn find_mapping(&self, address: u64) -> Option<&MemoryMapping> {
        self.mappings().iter().find(|mapping| mapping.contains(address))
    }

    /// The memory range to capture for a stack: from `stack_pointer` rounded
    /// down to a page, up to 32 KiB but not past the end of its mapping.
    fn get_stack_info(&self, stack_pointer: u64) -> Option<(u64, u64)> {
        let aligned = stack_pointer & !(self.page_size() - 1);
        let mapping = self.find_mapping(aligned)?;
        let len = (mapping.end() - aligned).min(STACK_TO_CAPTURE);
        Some((aligned, len))
    }

    /// Decide how a `" (deleted)"` mapped file can be read.
    ///
    /// Returns the procfs `exe` link if the mapping is the deleted main
    /// executable, which can still be opened through that link. A file that
    /// is really named `"foo (deleted)"` is left alone.
    fn deleted_file_path(&self, mapping: &MemoryMapping) -> Option<PathBuf> {
        let path = mapping.deleted_path()?;
        let exe_link = self.proc_path("exe");
        let target = fs::read_link(&exe_link).ok()?;
        if target != Path::new(&mapping.name) && target != Path::new(path) {
            return None;
        }
        if let (Ok(exe), Ok(named)) = (fs::metadata(&exe_link), fs::metadata(&mapping.name)) {
            if exe.dev() == named.dev() && exe.ino() == named.ino() {
                return None;
            }
        }
        Some(exe_link)
    }

    /// Compute the module identifier of `mapping`.
    ///
    /// The second value is true if the mapping was identified through the
    /// procfs `exe` link and its `" (deleted)"` suffix should be dropped.
    fn identify_mapping(&self, mapping: &MemoryMapping) -> Option<(FileId, bool)> {
        if mapping.is_unsafe_to_open() {
            debug!("not opening {}", mapping.name);
            return None;
        }
        if mapping.is_linux_gate() {
            let image = self
                .copy_from_process(mapping.start_address, mapping.size as usize)
                .ok()?;
            return FileId::from_elf(&image).map(|id| (id, false));
        }
        if !mapping.name_is_path() {
            return None;
        }

        let deleted = self.deleted_file_path(mapping);
        let path = match &deleted {
            Some(exe_link) => exe_link.as_path(),
            None => Path::new(&mapping.name),
        };
        let file = File::open(path).ok()?;
        // SAFETY: the mapping is only read, and dropped before returning.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(mapping.file_offset)
                .map(&file)
                .ok()?
        };
        if mmap.len() < elf::ELFMAG.len() {
            return None;
        }
        FileId::from_elf(&mmap).map(|id| (id, deleted.is_some()))
    }

    /// Compute the module identifier of `mapping`, which needn't be one of
    /// this dumper's mappings.
    fn elf_identifier_for_mapping(&self, mapping: &MemoryMapping) -> Option<FileId> {
        self.identify_mapping(mapping).map(|(id, _)| id)
    }

    /// Compute the module identifier of the mapping at `index`.
    ///
    /// A deleted main executable identified through the procfs `exe` link has
    /// the `" (deleted)"` suffix dropped from its name.
    fn elf_identifier_for_mapping_index(&mut self, index: usize) -> Option<FileId> {
        let mapping = self.mappings().get(index)?.clone();
        let (id, strip) = self.identify_mapping(&mapping)?;
        if strip {
            self.base_mut().mappings[index].strip_deleted_suffix();
        }
        Some(id)
    }

    /// Write a human-readable description of the target to `f`.
    fn print<T: Write>(&mut self, f: &mut T) -> io::Result<()>
    where
        Self: Sized,
    {
        writeln!(f, "pid            = {}", self.pid())?;
        writeln!(f, "post mortem    = {}", self.is_post_mortem())?;
        writeln!(f, "crash_thread   = {:?}", self.crash_thread())?;
        writeln!(f, "crash_signal   = {:?}", self.crash_signal())?;
        match self.crash_address() {
            Some(address) => writeln!(f, "crash_address  = {:#x}", address)?,
            None => writeln!(f, "crash_address  = None")?,
        }
        writeln!(f)?;
        for index in 0..self.mappings().len() {
            let id = self.elf_identifier_for_mapping_index(index);
            self.mappings()[index].print(f)?;
            match id {
                Some(id) => writeln!(f, "  identifier    = {}", id)?,
                None => writeln!(f, "  identifier    = (none)")?,
            }
        }
        writeln!(f)?;
        for index in 0..self.threads().len() {
            match self.thread_info_by_index(index) {
                Ok(info) => {
                    info.print(f)?;
                    if let Some((start, len)) = self.get_stack_info(info.stack_pointer()) {
                        writeln!(f, "  stack           = {:#x} + {:#x}", start, len)?;
                    }
                }
                Err(e) => writeln!(f, "thread {}: {}", self.threads()[index], e)?,
            }
        }
        Ok(())
    }
}
