// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! CPU register state of a thread.
//!
//! The kernel hands out registers as a packed `elf_gregset_t` (in
//! `NT_PRSTATUS` notes and from `PTRACE_GETREGSET`) whose layout depends on
//! the architecture. Each supported layout is decoded field by field into its
//! own struct; MIPS additionally gets its packed array remapped into named
//! fields.

use std::io::{self, Write};

use scroll::ctx::SizeWith;
use scroll::{Endian, Pread};

use crate::elf::{ElfClass, EM_386, EM_AARCH64, EM_ARM, EM_MIPS, EM_X86_64};

/// The CPU architectures a dumper understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cpu {
    X86,
    X86_64,
    Arm,
    Arm64,
    Mips,
    Mips64,
}

impl Cpu {
    /// The architecture described by an ELF header's `e_machine` and class.
    pub fn from_elf(machine: u16, class: ElfClass) -> Option<Cpu> {
        match (machine, class) {
            (EM_386, ElfClass::Elf32) => Some(Cpu::X86),
            (EM_X86_64, ElfClass::Elf64) => Some(Cpu::X86_64),
            (EM_ARM, ElfClass::Elf32) => Some(Cpu::Arm),
            (EM_AARCH64, ElfClass::Elf64) => Some(Cpu::Arm64),
            (EM_MIPS, ElfClass::Elf32) => Some(Cpu::Mips),
            (EM_MIPS, ElfClass::Elf64) => Some(Cpu::Mips64),
            _ => None,
        }
    }

    /// The architecture of the running process, if it's supported.
    pub fn native() -> Option<Cpu> {
        if cfg!(target_arch = "x86") {
            Some(Cpu::X86)
        } else if cfg!(target_arch = "x86_64") {
            Some(Cpu::X86_64)
        } else if cfg!(target_arch = "arm") {
            Some(Cpu::Arm)
        } else if cfg!(target_arch = "aarch64") {
            Some(Cpu::Arm64)
        } else if cfg!(target_arch = "mips") {
            Some(Cpu::Mips)
        } else if cfg!(target_arch = "mips64") {
            Some(Cpu::Mips64)
        } else {
            None
        }
    }

    pub fn class(self) -> ElfClass {
        match self {
            Cpu::X86 | Cpu::Arm | Cpu::Mips => ElfClass::Elf32,
            Cpu::X86_64 | Cpu::Arm64 | Cpu::Mips64 => ElfClass::Elf64,
        }
    }

    /// Number of words in `elf_gregset_t`.
    pub fn greg_count(self) -> usize {
        match self {
            Cpu::X86 => 17,
            Cpu::X86_64 => 27,
            Cpu::Arm => 18,
            Cpu::Arm64 => 34,
            Cpu::Mips | Cpu::Mips64 => 45,
        }
    }

    /// Size of `elf_gregset_t` in bytes.
    pub fn gregs_size(self) -> usize {
        self.greg_count() * self.class().word_size()
    }

    /// Size of the `NT_PRSTATUS` description (`struct elf_prstatus`).
    pub fn prstatus_size(self) -> usize {
        let (registers_offset, fpvalid_size) = match self.class() {
            ElfClass::Elf32 => (72, 4),
            // pr_fpvalid is padded to the struct's 8-byte alignment.
            ElfClass::Elf64 => (112, 8),
        };
        registers_offset + self.gregs_size() + fpvalid_size
    }

    /// Size of the `NT_FPREGSET` description, for architectures whose floating
    /// point registers are recorded.
    pub fn fp_registers_size(self) -> Option<usize> {
        match self {
            Cpu::X86 => Some(X86FpRegisters::size_with(&Endian::Little)),
            Cpu::X86_64 => Some(Amd64FpRegisters::size_with(&Endian::Little)),
            _ => None,
        }
    }

    /// Size of the `NT_PRXFPREG` description, only recorded on x86.
    pub fn fpx_registers_size(self) -> Option<usize> {
        match self {
            Cpu::X86 => Some(X86FpxRegisters::size_with(&Endian::Little)),
            _ => None,
        }
    }
}

/// `struct user_regs_struct` for x86.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, SizeWith)]
pub struct X86Registers {
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eax: u32,
    pub xds: u32,
    pub xes: u32,
    pub xfs: u32,
    pub xgs: u32,
    pub orig_eax: u32,
    pub eip: u32,
    pub xcs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub xss: u32,
}

/// `struct user_regs_struct` for x86-64.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, SizeWith)]
pub struct Amd64Registers {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

/// `struct user_regs` for 32-bit ARM: r0-r15, cpsr and orig_r0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, SizeWith)]
pub struct ArmRegisters {
    pub uregs: [u32; 18],
}

/// `struct user_pt_regs` for ARM64.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, SizeWith)]
pub struct Arm64Registers {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

/// MIPS registers, remapped from the kernel's packed register array.
///
/// 32-bit values are zero extended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MipsRegisters {
    pub regs: [u64; 32],
    pub lo: u64,
    pub hi: u64,
    pub epc: u64,
    pub badvaddr: u64,
    pub status: u64,
    pub cause: u64,
}

const ARM_REG_SP: usize = 13;
const ARM_REG_PC: usize = 15;
const MIPS_REG_SP: usize = 29;

impl MipsRegisters {
    /// Remap a packed MIPS register array. The 32-bit kernel layout starts
    /// with six words of padding, the 64-bit one doesn't.
    fn from_gregs(gregs: &[u64], cpu: Cpu) -> Option<MipsRegisters> {
        let r0 = if cpu == Cpu::Mips { 6 } else { 0 };
        let extra = gregs.get(r0 + 32..r0 + 38)?;
        let mut regs = [0; 32];
        regs.copy_from_slice(gregs.get(r0..r0 + 32)?);
        Some(MipsRegisters {
            regs,
            lo: extra[0],
            hi: extra[1],
            epc: extra[2],
            badvaddr: extra[3],
            status: extra[4],
            cause: extra[5],
        })
    }
}

/// The general purpose registers of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneralRegisters {
    X86(X86Registers),
    Amd64(Amd64Registers),
    Arm(ArmRegisters),
    Arm64(Arm64Registers),
    Mips(MipsRegisters),
    Mips64(MipsRegisters),
}

impl GeneralRegisters {
    /// Decode an `elf_gregset_t` for `cpu` from `bytes`.
    pub fn read(cpu: Cpu, bytes: &[u8], endian: Endian) -> Option<GeneralRegisters> {
        let regs = match cpu {
            Cpu::X86 => GeneralRegisters::X86(bytes.pread_with(0, endian).ok()?),
            Cpu::X86_64 => GeneralRegisters::Amd64(bytes.pread_with(0, endian).ok()?),
            Cpu::Arm => GeneralRegisters::Arm(bytes.pread_with(0, endian).ok()?),
            Cpu::Arm64 => GeneralRegisters::Arm64(bytes.pread_with(0, endian).ok()?),
            Cpu::Mips | Cpu::Mips64 => {
                let class = cpu.class();
                let mut offset = 0;
                let mut gregs = [0u64; 45];
                for greg in gregs.iter_mut() {
                    *greg = class.read_word(bytes, &mut offset, endian)?;
                }
                let mips = MipsRegisters::from_gregs(&gregs, cpu)?;
                if cpu == Cpu::Mips {
                    GeneralRegisters::Mips(mips)
                } else {
                    GeneralRegisters::Mips64(mips)
                }
            }
        };
        Some(regs)
    }

    pub fn cpu(&self) -> Cpu {
        match self {
            GeneralRegisters::X86(_) => Cpu::X86,
            GeneralRegisters::Amd64(_) => Cpu::X86_64,
            GeneralRegisters::Arm(_) => Cpu::Arm,
            GeneralRegisters::Arm64(_) => Cpu::Arm64,
            GeneralRegisters::Mips(_) => Cpu::Mips,
            GeneralRegisters::Mips64(_) => Cpu::Mips64,
        }
    }

    pub fn stack_pointer(&self) -> u64 {
        match self {
            GeneralRegisters::X86(regs) => regs.esp.into(),
            GeneralRegisters::Amd64(regs) => regs.rsp,
            GeneralRegisters::Arm(regs) => regs.uregs[ARM_REG_SP].into(),
            GeneralRegisters::Arm64(regs) => regs.sp,
            GeneralRegisters::Mips(regs) | GeneralRegisters::Mips64(regs) => regs.regs[MIPS_REG_SP],
        }
    }

    pub fn instruction_pointer(&self) -> u64 {
        match self {
            GeneralRegisters::X86(regs) => regs.eip.into(),
            GeneralRegisters::Amd64(regs) => regs.rip,
            GeneralRegisters::Arm(regs) => regs.uregs[ARM_REG_PC].into(),
            GeneralRegisters::Arm64(regs) => regs.pc,
            GeneralRegisters::Mips(regs) | GeneralRegisters::Mips64(regs) => regs.epc,
        }
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f, "{:#x?}", self)
    }
}

/// `struct user_fpregs_struct` for x86.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pread, SizeWith)]
pub struct X86FpRegisters {
    pub cwd: u32,
    pub swd: u32,
    pub twd: u32,
    pub fip: u32,
    pub fcs: u32,
    pub foo: u32,
    pub fos: u32,
    pub st_space: [u32; 20],
}

/// `struct user_fpxregs_struct` for x86.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pread, SizeWith)]
pub struct X86FpxRegisters {
    pub cwd: u16,
    pub swd: u16,
    pub twd: u16,
    pub fop: u16,
    pub fip: u32,
    pub fcs: u32,
    pub foo: u32,
    pub fos: u32,
    pub mxcsr: u32,
    pub reserved: u32,
    pub st_space: [u32; 32],
    pub xmm_space: [u32; 32],
    pub padding: [u32; 56],
}

impl X86FpxRegisters {
    pub fn read(bytes: &[u8], endian: Endian) -> Option<X86FpxRegisters> {
        bytes.pread_with(0, endian).ok()
    }
}

/// `struct user_fpregs_struct` for x86-64.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pread, SizeWith)]
pub struct Amd64FpRegisters {
    pub cwd: u16,
    pub swd: u16,
    pub ftw: u16,
    pub fop: u16,
    pub rip: u64,
    pub rdp: u64,
    pub mxcsr: u32,
    pub mxcr_mask: u32,
    pub st_space: [u32; 32],
    pub xmm_space: [u32; 64],
    pub padding: [u32; 24],
}

/// The floating point registers of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpRegisters {
    X86(X86FpRegisters),
    Amd64(Amd64FpRegisters),
}

impl FpRegisters {
    /// Decode an `NT_FPREGSET` description for `cpu`.
    pub fn read(cpu: Cpu, bytes: &[u8], endian: Endian) -> Option<FpRegisters> {
        match cpu {
            Cpu::X86 => bytes.pread_with(0, endian).ok().map(FpRegisters::X86),
            Cpu::X86_64 => bytes.pread_with(0, endian).ok().map(FpRegisters::Amd64),
            _ => None,
        }
    }
}
