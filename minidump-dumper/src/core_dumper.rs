// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A [`LinuxDumper`] for a core file.

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::core_file::CoreFile;
use crate::dumper::{DumperBase, LinuxDumper};
use crate::errors::DumperError;
use crate::thread_info::{enumerate_core_threads, ThreadInfo};

/// Introspects a crashed process from its core file.
///
/// Threads and registers come from the core's notes and memory from its
/// `PT_LOAD` segments. The mappings, auxiliary vector and `exe` link are read
/// from a copy of the process's procfs directory.
#[derive(Debug)]
pub struct CoreDumper {
    base: DumperBase,
    core_path: PathBuf,
    procfs_path: PathBuf,
    core: Option<CoreFile<Mmap>>,
    thread_infos: Vec<ThreadInfo>,
}

impl CoreDumper {
    /// `pid` is the id of the crashed process, `procfs_path` the directory
    /// holding its saved `maps`, `auxv` and `exe`.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(pid: i32, core_path: P, procfs_path: Q) -> CoreDumper {
        CoreDumper {
            base: DumperBase::new(pid),
            core_path: core_path.as_ref().to_owned(),
            procfs_path: procfs_path.as_ref().to_owned(),
            core: None,
            thread_infos: Vec::new(),
        }
    }

    /// The core file, once [`init`](LinuxDumper::init) has mapped it.
    pub fn core(&self) -> Option<&CoreFile<Mmap>> {
        self.core.as_ref()
    }

    fn enumerate_threads(&mut self) -> Result<(), DumperError> {
        let core = CoreFile::open(&self.core_path)?;
        let threads = enumerate_core_threads(core.notes()?, core.cpu(), core.endian())?;
        debug!(
            "core file {}: {:?}, {} threads",
            self.core_path.display(),
            core.cpu(),
            threads.threads.len()
        );
        self.base.threads = threads.threads.iter().map(|thread| thread.tid).collect();
        self.base.crash_thread = threads.crash_thread;
        self.base.crash_signal = threads.crash_signal;
        self.base.crash_address = threads.crash_address;
        self.thread_infos = threads.threads;
        self.core = Some(core);
        Ok(())
    }
}

impl LinuxDumper for CoreDumper {
    fn base(&self) -> &DumperBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DumperBase {
        &mut self.base
    }

    fn init(&mut self) -> Result<(), DumperError> {
        self.enumerate_threads()?;
        if let Some(core) = &self.core {
            let (class, endian) = (core.class(), core.endian());
            self.read_auxv(class, endian);
        }
        self.enumerate_mappings()
    }

    fn is_post_mortem(&self) -> bool {
        true
    }

    fn threads_suspend(&mut self) -> Result<(), DumperError> {
        Ok(())
    }

    fn threads_resume(&mut self) -> Result<(), DumperError> {
        Ok(())
    }

    fn thread_info_by_index(&self, index: usize) -> Result<ThreadInfo, DumperError> {
        self.thread_infos
            .get(index)
            .cloned()
            .ok_or(DumperError::ThreadIndexOutOfBounds {
                index,
                count: self.thread_infos.len(),
            })
    }

    fn copy_from_process(&self, address: u64, length: usize) -> Result<Vec<u8>, DumperError> {
        let core = self.core.as_ref().ok_or(DumperError::NotInitialized)?;
        core.copy_data(address, length)
            .map(|data| data.to_vec())
            .ok_or(DumperError::CopyFromProcessFailed { address, length })
    }

    fn proc_path(&self, node: &str) -> PathBuf {
        self.procfs_path.join(node)
    }
}
