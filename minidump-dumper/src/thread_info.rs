// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Threads and their register state, and how to recover them from the notes
//! of a core file.

use std::io::{self, Write};

use scroll::{Endian, Pread};
use tracing::{debug, trace};

use crate::context::{Cpu, FpRegisters, GeneralRegisters, X86FpxRegisters};
use crate::elf::{ElfClass, ElfNote, NoteIter, NT_FPREGSET, NT_PRSTATUS, NT_PRXFPREG, NT_SIGINFO};
use crate::errors::CoreError;

/// The kernel's `siginfo_t` is always this big.
pub const SIGINFO_SIZE: usize = 128;

const SIGILL: i32 = 4;
const SIGBUS: i32 = 7;
const SIGFPE: i32 = 8;
const SIGSEGV: i32 = 11;

/// A thread of the target along with its registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: i32,
    /// Thread group id (the process id)
    pub tgid: i32,
    /// Parent process id
    pub ppid: i32,
    pub regs: GeneralRegisters,
    /// Floating point registers, on architectures where they are recorded.
    pub fpregs: Option<FpRegisters>,
    /// Extended floating point registers, only on x86.
    pub fpxregs: Option<X86FpxRegisters>,
}

impl ThreadInfo {
    /// The stack pointer, taken from the architecture's register block.
    pub fn stack_pointer(&self) -> u64 {
        self.regs.stack_pointer()
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.regs.instruction_pointer()
    }

    /// Write a human-readable description of this thread to `f`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            "ThreadInfo
  tid                 = {}
  tgid                = {}
  ppid                = {}
  cpu                 = {:?}
  instruction_pointer = {:#x}
  stack_pointer       = {:#x}
  fpregs              = {}
",
            self.tid,
            self.tgid,
            self.ppid,
            self.regs.cpu(),
            self.instruction_pointer(),
            self.stack_pointer(),
            if self.fpregs.is_some() { "present" } else { "absent" },
        )?;
        self.regs.print(f)
    }
}

/// The threads recovered from a core file and what the notes say about the
/// crash.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoreThreads {
    pub threads: Vec<ThreadInfo>,
    /// The thread of the first `NT_PRSTATUS` note.
    pub crash_thread: Option<i32>,
    /// The signal of the first `NT_PRSTATUS` note.
    pub crash_signal: Option<i32>,
    /// The faulting address from `NT_SIGINFO`, for faults that have one.
    pub crash_address: Option<u64>,
}

/// The fields of `struct elf_prstatus` that are used.
struct PrStatus {
    signo: i32,
    pid: i32,
    ppid: i32,
    pgrp: i32,
    regs: GeneralRegisters,
}

impl PrStatus {
    fn read(desc: &[u8], cpu: Cpu, endian: Endian) -> Option<PrStatus> {
        // pr_info, pr_cursig, pr_sigpend and pr_sighold come before the ids.
        let (ids_offset, regs_offset) = match cpu.class() {
            ElfClass::Elf32 => (24, 72),
            ElfClass::Elf64 => (32, 112),
        };
        let signo = desc.pread_with(0, endian).ok()?;
        let mut offset = ids_offset;
        let pid = desc.gread_with(&mut offset, endian).ok()?;
        let ppid = desc.gread_with(&mut offset, endian).ok()?;
        let pgrp = desc.gread_with(&mut offset, endian).ok()?;
        let regs = GeneralRegisters::read(cpu, desc.get(regs_offset..)?, endian)?;
        Some(PrStatus {
            signo,
            pid,
            ppid,
            pgrp,
            regs,
        })
    }
}

/// Where the note walk is.
enum NoteState<'a> {
    AwaitingNote,
    HaveNote(ElfNote<'a>),
    NoMoreNotes,
}

fn count_threads(notes: &[u8], endian: Endian) -> usize {
    NoteIter::new(notes, endian)
        .filter(|note| note.n_type == NT_PRSTATUS)
        .count()
}

fn check_size(expected: Option<usize>, actual: usize) -> Result<(), CoreError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(CoreError::FpRegistersSizeMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

impl CoreThreads {
    fn handle_note(&mut self, note: ElfNote<'_>, cpu: Cpu, endian: Endian) -> Result<(), CoreError> {
        if note.n_type == 0 || note.name.is_empty() || note.desc.is_empty() {
            return Err(CoreError::MalformedNote(note.n_type));
        }
        match note.n_type {
            NT_PRSTATUS => {
                let expected = cpu.prstatus_size();
                if note.desc.len() != expected {
                    return Err(CoreError::PrStatusSizeMismatch {
                        expected,
                        actual: note.desc.len(),
                    });
                }
                let status = PrStatus::read(note.desc, cpu, endian)
                    .ok_or(CoreError::MalformedNote(note.n_type))?;
                if self.threads.is_empty() {
                    self.crash_thread = Some(status.pid);
                    self.crash_signal = Some(status.signo);
                }
                trace!("thread {} from NT_PRSTATUS", status.pid);
                self.threads.push(ThreadInfo {
                    tid: status.pid,
                    tgid: status.pgrp,
                    ppid: status.ppid,
                    regs: status.regs,
                    fpregs: None,
                    fpxregs: None,
                });
            }
            NT_FPREGSET if cpu.fp_registers_size().is_some() => {
                check_size(cpu.fp_registers_size(), note.desc.len())?;
                let thread = self
                    .threads
                    .last_mut()
                    .ok_or(CoreError::FpRegistersWithoutThread)?;
                thread.fpregs = FpRegisters::read(cpu, note.desc, endian);
            }
            NT_PRXFPREG if cpu.fpx_registers_size().is_some() => {
                check_size(cpu.fpx_registers_size(), note.desc.len())?;
                let thread = self
                    .threads
                    .last_mut()
                    .ok_or(CoreError::FpRegistersWithoutThread)?;
                thread.fpxregs = X86FpxRegisters::read(note.desc, endian);
            }
            NT_SIGINFO => self.handle_siginfo(note.desc, cpu, endian),
            other => trace!("ignoring note type {:#x}", other),
        }
        Ok(())
    }

    /// Take the fault address from a `siginfo_t`, for the signals that have one.
    fn handle_siginfo(&mut self, desc: &[u8], cpu: Cpu, endian: Endian) {
        if desc.len() != SIGINFO_SIZE {
            debug!("ignoring NT_SIGINFO of {} bytes", desc.len());
            return;
        }
        let signo: i32 = match desc.pread_with(0, endian) {
            Ok(signo) => signo,
            Err(_) => return,
        };
        if let SIGILL | SIGFPE | SIGSEGV | SIGBUS = signo {
            // si_addr follows si_signo, si_errno and si_code, aligned to a word.
            let mut offset = match cpu.class() {
                ElfClass::Elf32 => 12,
                ElfClass::Elf64 => 16,
            };
            self.crash_address = cpu.class().read_word(desc, &mut offset, endian);
        }
    }
}

/// Recover the threads of a core file from the contents of its `PT_NOTE`
/// segment.
///
/// Notes are handled strictly in file order. Each `NT_PRSTATUS` adds a
/// thread; `NT_FPREGSET` and `NT_PRXFPREG` fill in the most recently added
/// thread. The first `NT_PRSTATUS` names the crashing thread. Unknown note
/// types are skipped. A note with type 0, or an empty name or description,
/// fails the whole walk.
pub fn enumerate_core_threads(
    notes: &[u8],
    cpu: Cpu,
    endian: Endian,
) -> Result<CoreThreads, CoreError> {
    let mut result = CoreThreads {
        threads: Vec::with_capacity(count_threads(notes, endian)),
        ..CoreThreads::default()
    };
    let mut iter = NoteIter::new(notes, endian);
    let mut state = match iter.next() {
        Some(note) => NoteState::HaveNote(note),
        None => return Err(CoreError::MissingNotes),
    };
    loop {
        state = match state {
            NoteState::AwaitingNote => match iter.next() {
                Some(note) => NoteState::HaveNote(note),
                None => NoteState::NoMoreNotes,
            },
            NoteState::HaveNote(note) => {
                result.handle_note(note, cpu, endian)?;
                NoteState::AwaitingNote
            }
            NoteState::NoMoreNotes => break,
        };
    }
    debug!("found {} threads in core notes", result.threads.len());
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use minidump_dumper_synth::{self as synth, Notes, PrStatus as SynthPrStatus, SigInfo};
    use test_assembler::{Endian as SynthEndian, Section};

    const E: SynthEndian = SynthEndian::Little;

    fn prstatus(pid: u32, signo: u32, sp: u64) -> SynthPrStatus {
        let mut regs = vec![0; synth::AMD64_GREG_COUNT];
        regs[19] = sp;
        SynthPrStatus::new(synth::ElfClass::Elf64, E, pid, regs)
            .signal(signo)
            .ppid(1)
            .pgrp(pid)
    }

    fn run(notes: Notes) -> Result<CoreThreads, CoreError> {
        let section: Section = notes.into();
        let data = section.get_contents().unwrap();
        enumerate_core_threads(&data, Cpu::X86_64, Endian::Little)
    }

    #[test]
    fn test_threads_and_fp() {
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(100, 11, 0x7ff0))
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[1; 512])
            .add_note_bytes(synth::NT_PRPSINFO, "CORE", &[0; 136])
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(101, 0, 0x8ff0))
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[2; 512]);
        let core = run(notes).unwrap();
        assert_eq!(core.threads.len(), 2);
        assert_eq!(core.crash_thread, Some(100));
        assert_eq!(core.crash_signal, Some(11));
        assert_eq!(core.crash_address, None);

        let t0 = &core.threads[0];
        assert_eq!((t0.tid, t0.tgid, t0.ppid), (100, 100, 1));
        assert_eq!(t0.stack_pointer(), 0x7ff0);
        let t1 = &core.threads[1];
        assert_eq!(t1.tid, 101);
        assert_eq!(t1.stack_pointer(), 0x8ff0);

        // Each thread keeps its own FP block.
        match (t0.fpregs, t1.fpregs) {
            (Some(FpRegisters::Amd64(f1)), Some(FpRegisters::Amd64(f2))) => {
                assert_eq!(f1.cwd, 0x0101);
                assert_eq!(f2.cwd, 0x0202);
            }
            other => panic!("unexpected fp registers {:?}", other),
        }
    }

    #[test]
    fn test_crash_thread_not_overwritten() {
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(5, 6, 0))
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(7, 11, 0))
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(9, 4, 0));
        let core = run(notes).unwrap();
        assert_eq!(core.threads.len(), 3);
        assert_eq!(core.crash_thread, Some(5));
        assert_eq!(core.crash_signal, Some(6));
    }

    #[test]
    fn test_first_note_type_zero() {
        let notes = Notes::new(E)
            .add_note_bytes(0, "CORE", &[1; 8])
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0));
        assert_eq!(run(notes), Err(CoreError::MalformedNote(0)));
    }

    #[test]
    fn test_empty_name_or_desc() {
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0))
            .add_note_bytes(0x200, "", &[1; 8]);
        assert_eq!(run(notes), Err(CoreError::MalformedNote(0x200)));

        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0))
            .add_note_bytes(0x200, "LINUX", &[]);
        assert_eq!(run(notes), Err(CoreError::MalformedNote(0x200)));
    }

    #[test]
    fn test_missing_notes() {
        assert_eq!(
            enumerate_core_threads(&[], Cpu::X86_64, Endian::Little),
            Err(CoreError::MissingNotes)
        );
        assert_eq!(
            enumerate_core_threads(&[0; 8], Cpu::X86_64, Endian::Little),
            Err(CoreError::MissingNotes)
        );
    }

    #[test]
    fn test_prstatus_wrong_size() {
        let notes = Notes::new(E).add_note_bytes(synth::NT_PRSTATUS, "CORE", &[0; 144]);
        assert_eq!(
            run(notes),
            Err(CoreError::PrStatusSizeMismatch {
                expected: 336,
                actual: 144
            })
        );
    }

    #[test]
    fn test_fp_before_thread() {
        let notes = Notes::new(E)
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[0; 512])
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0));
        assert_eq!(run(notes), Err(CoreError::FpRegistersWithoutThread));
    }

    #[test]
    fn test_fp_wrong_size() {
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0))
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[0; 108]);
        assert_eq!(
            run(notes),
            Err(CoreError::FpRegistersSizeMismatch {
                expected: 512,
                actual: 108
            })
        );
    }

    #[test]
    fn test_siginfo() {
        let siginfo = |signo| SigInfo {
            class: synth::ElfClass::Elf64,
            endian: E,
            signo,
            errno: 0,
            code: 1,
            addr: 0xdead_beef,
        };
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0))
            .add_note(synth::NT_SIGINFO, "CORE", siginfo(11));
        assert_eq!(run(notes).unwrap().crash_address, Some(0xdead_beef));

        // SIGABRT has no fault address.
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 6, 0))
            .add_note(synth::NT_SIGINFO, "CORE", siginfo(6));
        assert_eq!(run(notes).unwrap().crash_address, None);

        // Wrong sized siginfo is ignored.
        let notes = Notes::new(E)
            .add_note(synth::NT_PRSTATUS, "CORE", prstatus(1, 11, 0))
            .add_note_bytes(synth::NT_SIGINFO, "CORE", &[11, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(run(notes).unwrap().crash_address, None);
    }

    #[test]
    fn test_x86_extended_fp() {
        let e = SynthEndian::Little;
        let regs = vec![0x1000; synth::X86_GREG_COUNT];
        let status = SynthPrStatus::new(synth::ElfClass::Elf32, e, 42, regs).signal(11);
        let notes = Notes::new(e)
            .add_note(synth::NT_PRSTATUS, "CORE", status)
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[3; 108])
            .add_note_bytes(synth::NT_PRXFPREG, "LINUX", &[4; 512]);
        let section: Section = notes.into();
        let data = section.get_contents().unwrap();
        let core = enumerate_core_threads(&data, Cpu::X86, Endian::Little).unwrap();
        let thread = &core.threads[0];
        assert_eq!(thread.stack_pointer(), 0x1000);
        assert!(matches!(thread.fpregs, Some(FpRegisters::X86(_))));
        assert_eq!(thread.fpxregs.map(|fpx| fpx.cwd), Some(0x0404));
    }

    #[test]
    fn test_arm64_ignores_fp_notes() {
        let e = SynthEndian::Big;
        let mut regs = vec![0; synth::ARM64_GREG_COUNT];
        regs[31] = 0xffff_0000;
        let status = SynthPrStatus::new(synth::ElfClass::Elf64, e, 3, regs);
        let notes = Notes::new(e)
            .add_note(synth::NT_PRSTATUS, "CORE", status)
            .add_note_bytes(synth::NT_FPREGSET, "CORE", &[0; 528]);
        let section: Section = notes.into();
        let data = section.get_contents().unwrap();
        let core = enumerate_core_threads(&data, Cpu::Arm64, Endian::Big).unwrap();
        assert_eq!(core.threads[0].stack_pointer(), 0xffff_0000);
        assert_eq!(core.threads[0].fpregs, None);
    }
}
