// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A [`LinuxDumper`] for a live process, using ptrace and procfs.

use std::convert::TryFrom;
use std::ffi::c_void;
use std::fs::{self, File};
use std::io::IoSliceMut;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::uio::{self, RemoteIoVec};
use nix::sys::wait::{self, WaitPidFlag};
use nix::unistd::Pid;
use procfs_core::prelude::*;
use procfs_core::process::Status;
use tracing::{debug, warn};

use crate::context::{Cpu, FpRegisters, GeneralRegisters, X86FpxRegisters};
use crate::dumper::{DumperBase, LinuxDumper};
use crate::elf::{ElfClass, NT_FPREGSET, NT_PRSTATUS, NT_PRXFPREG};
use crate::errors::DumperError;
use crate::thread_info::ThreadInfo;

/// Introspects a live process.
///
/// Threads are listed from `/proc/<pid>/task`. Reading registers requires the
/// threads to be ptrace-attached with [`threads_suspend`](LinuxDumper::threads_suspend).
/// The crash thread and signal are not known to the dumper and have to be
/// set by the caller.
#[derive(Debug)]
pub struct PtraceDumper {
    base: DumperBase,
    cpu: Option<Cpu>,
    threads_suspended: bool,
}

impl PtraceDumper {
    pub fn new(pid: i32) -> PtraceDumper {
        PtraceDumper {
            base: DumperBase::new(pid),
            cpu: Cpu::native(),
            threads_suspended: false,
        }
    }

    fn enumerate_threads(&mut self) -> Result<(), DumperError> {
        let pid = self.base.pid;
        let entries =
            fs::read_dir(self.proc_path("task")).map_err(|_| DumperError::ThreadsUnreadable(pid))?;
        let threads: Vec<i32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
            .collect();
        if threads.is_empty() {
            return Err(DumperError::ThreadsUnreadable(pid));
        }
        debug!("process {} has {} threads", pid, threads.len());
        self.base.threads = threads;
        Ok(())
    }

    fn read_status(&self, tid: i32) -> Result<Status, DumperError> {
        let path = self.proc_path(&format!("task/{}/status", tid));
        let file = File::open(path).map_err(|_| DumperError::ThreadStatusUnreadable(tid))?;
        Status::from_read(file).map_err(|_| DumperError::ThreadStatusUnreadable(tid))
    }
}

/// Read register set `regset` of a ptrace-stopped thread.
///
/// nix only wraps `PTRACE_GETREGSET` for a few architectures and typed
/// register structs, so the raw request is made here.
fn get_regset(tid: Pid, regset: u32, size: usize) -> Result<Vec<u8>, nix::Error> {
    let mut buf = vec![0u8; size];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: the kernel writes at most `iov_len` bytes to `buf` and updates
    // `iov_len` with the amount written.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            tid.as_raw(),
            regset as usize as *mut c_void,
            &mut iov as *mut libc::iovec,
        )
    };
    Errno::result(ret)?;
    buf.truncate(iov.iov_len);
    Ok(buf)
}

fn suspend_thread(tid: Pid) -> bool {
    if let Err(e) = ptrace::attach(tid) {
        warn!("failed to attach to thread {}: {}", tid, e);
        return false;
    }
    loop {
        match wait::waitpid(tid, Some(WaitPidFlag::__WALL)) {
            Ok(_) => return true,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("failed to wait for thread {}: {}", tid, e);
                resume_thread(tid);
                return false;
            }
        }
    }
}

fn resume_thread(tid: Pid) -> bool {
    match ptrace::detach(tid, None) {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to detach from thread {}: {}", tid, e);
            false
        }
    }
}

/// Read with `process_vm_readv`, returning how much was read.
fn read_vmem(pid: Pid, address: u64, dst: &mut [u8]) -> Result<usize, nix::Error> {
    let base = usize::try_from(address).map_err(|_| Errno::EFAULT)?;
    let remote = &[RemoteIoVec {
        base,
        len: dst.len(),
    }];
    uio::process_vm_readv(pid, &mut [IoSliceMut::new(dst)], remote)
}

impl LinuxDumper for PtraceDumper {
    fn base(&self) -> &DumperBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DumperBase {
        &mut self.base
    }

    fn init(&mut self) -> Result<(), DumperError> {
        self.enumerate_threads()?;
        self.read_auxv(ElfClass::native(), scroll::NATIVE);
        self.enumerate_mappings()
    }

    fn is_post_mortem(&self) -> bool {
        false
    }

    /// Attach to every thread. Threads that can't be attached to are dropped
    /// from the thread list.
    fn threads_suspend(&mut self) -> Result<(), DumperError> {
        if self.threads_suspended {
            return Ok(());
        }
        self.base.threads.retain(|&tid| suspend_thread(Pid::from_raw(tid)));
        if self.base.threads.is_empty() {
            return Err(DumperError::SuspendFailed(self.base.pid));
        }
        self.threads_suspended = true;
        Ok(())
    }

    fn threads_resume(&mut self) -> Result<(), DumperError> {
        if self.threads_suspended {
            for &tid in &self.base.threads {
                resume_thread(Pid::from_raw(tid));
            }
            self.threads_suspended = false;
        }
        Ok(())
    }

    fn thread_info_by_index(&self, index: usize) -> Result<ThreadInfo, DumperError> {
        let tid = *self
            .base
            .threads
            .get(index)
            .ok_or(DumperError::ThreadIndexOutOfBounds {
                index,
                count: self.base.threads.len(),
            })?;
        let cpu = self.cpu.ok_or(DumperError::UnsupportedArchitecture)?;
        let status = self.read_status(tid)?;

        let pid = Pid::from_raw(tid);

        let regs = get_regset(pid, NT_PRSTATUS, cpu.gregs_size())
            .map_err(|e| {
                debug!("PTRACE_GETREGSET(NT_PRSTATUS) on thread {} failed: {}", tid, e);
                DumperError::ThreadRegistersUnreadable(tid)
            })
            .and_then(|bytes| {
                GeneralRegisters::read(cpu, &bytes, scroll::NATIVE)
                    .ok_or(DumperError::ThreadRegistersUnreadable(tid))
            })?;
        let fpregs = cpu
            .fp_registers_size()
            .and_then(|size| get_regset(pid, NT_FPREGSET, size).ok())
            .and_then(|bytes| FpRegisters::read(cpu, &bytes, scroll::NATIVE));
        let fpxregs = cpu
            .fpx_registers_size()
            .and_then(|size| get_regset(pid, NT_PRXFPREG, size).ok())
            .and_then(|bytes| X86FpxRegisters::read(&bytes, scroll::NATIVE));

        Ok(ThreadInfo {
            tid,
            tgid: status.tgid,
            ppid: status.ppid,
            regs,
            fpregs,
            fpxregs,
        })
    }

    /// Read with `process_vm_readv`, falling back to `/proc/<pid>/mem`.
    fn copy_from_process(&self, address: u64, length: usize) -> Result<Vec<u8>, DumperError> {
        let failed = || DumperError::CopyFromProcessFailed { address, length };
        if length == 0 {
            return Err(failed());
        }
        let mut buf = vec![0; length];
        match read_vmem(Pid::from_raw(self.base.pid), address, &mut buf) {
            Ok(read) if read == length => return Ok(buf),
            Ok(read) => debug!("process_vm_readv at {:#x} only read {} bytes", address, read),
            Err(e) => debug!("process_vm_readv at {:#x} failed: {}", address, e),
        }
        let mem = File::open(self.proc_path("mem")).map_err(|_| failed())?;
        mem.read_exact_at(&mut buf, address).map_err(|_| failed())?;
        Ok(buf)
    }

    fn proc_path(&self, node: &str) -> PathBuf {
        PathBuf::from(format!("/proc/{}/{}", self.base.pid, node))
    }
}

impl Drop for PtraceDumper {
    fn drop(&mut self) {
        let _ = self.threads_resume();
    }
}
