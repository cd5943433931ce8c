// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic ELF images and core files for testing
//!
//! Like `minidump-synth`, this intentionally doesn't use minidump-dumper's own
//! layouts so that incorrect changes to its parsers get caught. It exists as an
//! internal dev-dependency of minidump-dumper.
//!
//! Basic usage is to create a [SynthElf][] (or a [SynthCore][] for core files),
//! add segments and sections built from [Notes][], [PrStatus][] and friends, and
//! then `finish()` to get the bytes.

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use test_assembler::*;

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_NOTE: u32 = 7;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const ET_CORE: u16 = 4;

pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub const NT_PRSTATUS: u32 = 1;
pub const NT_FPREGSET: u32 = 2;
pub const NT_PRPSINFO: u32 = 3;
pub const NT_GNU_BUILD_ID: u32 = 3;
pub const NT_SIGINFO: u32 = 0x5349_4749;
pub const NT_PRXFPREG: u32 = 0x46e6_2b7f;

pub const AT_NULL: u64 = 0;
pub const AT_PHDR: u64 = 3;
pub const AT_PAGESZ: u64 = 6;
pub const AT_ENTRY: u64 = 9;
pub const AT_SYSINFO_EHDR: u64 = 33;

/// Number of general purpose registers in `elf_gregset_t`, per architecture.
pub const X86_GREG_COUNT: usize = 17;
pub const AMD64_GREG_COUNT: usize = 27;
pub const ARM_GREG_COUNT: usize = 18;
pub const ARM64_GREG_COUNT: usize = 34;
pub const MIPS_GREG_COUNT: usize = 45;

/// The size of the kernel's `siginfo_t`.
pub const SIGINFO_SIZE: usize = 128;

/// ELF file class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn ident(self) -> u8 {
        match self {
            ElfClass::Elf32 => 1,
            ElfClass::Elf64 => 2,
        }
    }

    /// The size in bytes of an address or offset.
    pub fn word_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    fn header_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 52,
            ElfClass::Elf64 => 64,
        }
    }

    fn phdr_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }

    fn shdr_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 40,
            ElfClass::Elf64 => 64,
        }
    }
}

fn data_encoding(endian: Endian) -> u8 {
    match endian {
        Endian::Little => 1,
        Endian::Big => 2,
    }
}

/// Append a class-sized word to `section`.
fn word(section: Section, class: ElfClass, value: u64) -> Section {
    match class {
        ElfClass::Elf32 => section.D32(value as u32),
        ElfClass::Elf64 => section.D64(value),
    }
}

/// Append a class-sized word whose value is `label` to `section`.
fn word_label(section: Section, class: ElfClass, label: &Label) -> Section {
    match class {
        ElfClass::Elf32 => section.D32(label),
        ElfClass::Elf64 => section.D64(label),
    }
}

/// A `Section` holding exactly `bytes`.
pub fn bytes_section(endian: Endian, bytes: &[u8]) -> Section {
    Section::with_endian(endian).append_bytes(bytes)
}

struct SynthSegment {
    p_type: u32,
    vaddr: u64,
    data: Section,
}

struct SynthSection {
    name: String,
    name_offset: Option<u32>,
    sh_type: u32,
    data: Section,
}

/// A writer of synthetic ELF images.
///
/// The layout is: ELF header, program header table, segment and section
/// contents (each 4-byte aligned), the section name string table and finally
/// the section header table. Section 0 is the null section and the last
/// section is `.shstrtab`.
pub struct SynthElf {
    class: ElfClass,
    endian: Endian,
    e_type: u16,
    machine: u16,
    entry: u64,
    shstrndx: Option<u16>,
    segments: Vec<SynthSegment>,
    sections: Vec<SynthSection>,
}

impl SynthElf {
    /// Create an empty executable image of `class` with `endian` byte order.
    pub fn new(class: ElfClass, endian: Endian) -> SynthElf {
        SynthElf {
            class,
            endian,
            e_type: ET_EXEC,
            machine: EM_X86_64,
            entry: 0,
            shstrndx: None,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn class(&self) -> ElfClass {
        self.class
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Set `e_type`.
    pub fn elf_type(mut self, e_type: u16) -> SynthElf {
        self.e_type = e_type;
        self
    }

    /// Set `e_machine`.
    pub fn machine(mut self, machine: u16) -> SynthElf {
        self.machine = machine;
        self
    }

    /// Set `e_entry`.
    pub fn entry(mut self, entry: u64) -> SynthElf {
        self.entry = entry;
        self
    }

    /// Override `e_shstrndx`, which normally points at `.shstrtab`.
    pub fn shstrndx(mut self, index: u16) -> SynthElf {
        self.shstrndx = Some(index);
        self
    }

    /// Add a program header of `p_type` whose file contents are `data`.
    pub fn add_segment<T: Into<Section>>(mut self, p_type: u32, vaddr: u64, data: T) -> SynthElf {
        self.segments.push(SynthSegment {
            p_type,
            vaddr,
            data: data.into(),
        });
        self
    }

    /// Add a section named `name` of `sh_type` whose contents are `data`.
    pub fn add_section<T: Into<Section>>(mut self, name: &str, sh_type: u32, data: T) -> SynthElf {
        self.sections.push(SynthSection {
            name: name.to_owned(),
            name_offset: None,
            sh_type,
            data: data.into(),
        });
        self
    }

    /// Add a section whose `sh_name` is the raw string table offset `name_offset`.
    pub fn add_section_with_name_offset<T: Into<Section>>(
        mut self,
        name_offset: u32,
        sh_type: u32,
        data: T,
    ) -> SynthElf {
        self.sections.push(SynthSection {
            name: String::new(),
            name_offset: Some(name_offset),
            sh_type,
            data: data.into(),
        });
        self
    }

    /// Finish generating the image and return the contents.
    pub fn finish(self) -> Option<Vec<u8>> {
        let SynthElf {
            class,
            endian,
            e_type,
            machine,
            entry,
            shstrndx,
            segments,
            sections,
        } = self;

        // Section name string table, offset 0 is the empty name.
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::with_capacity(sections.len());
        for s in &sections {
            match s.name_offset {
                Some(offset) => name_offsets.push(offset),
                None => {
                    name_offsets.push(strtab.len() as u32);
                    strtab.extend_from_slice(s.name.as_bytes());
                    strtab.push(0);
                }
            }
        }
        let shstrtab_name = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab\0");
        let shstrtab = bytes_section(endian, &strtab);

        let phoff = Label::new();
        let shoff = Label::new();
        let phnum = segments.len() as u16;
        // null section + user sections + .shstrtab
        let shnum = sections.len() as u16 + 2;

        let section = Section::with_endian(endian);
        section.start().set_const(0);
        let section = section
            .append_bytes(&[0x7f, b'E', b'L', b'F'])
            .D8(class.ident())
            .D8(data_encoding(endian))
            .D8(1) // EI_VERSION
            .D8(0) // EI_OSABI
            .append_repeated(0, 8)
            .D16(e_type)
            .D16(machine)
            .D32(1); // e_version
        let section = word(section, class, entry);
        let section = word_label(section, class, &phoff);
        let section = word_label(section, class, &shoff);
        let section = section
            .D32(0) // e_flags
            .D16(class.header_size())
            .D16(class.phdr_size())
            .D16(phnum)
            .D16(class.shdr_size())
            .D16(shnum)
            .D16(shstrndx.unwrap_or(shnum - 1));

        let mut section = if segments.is_empty() {
            phoff.set_const(0);
            section
        } else {
            section.mark(&phoff)
        };

        let mut blobs = Vec::with_capacity(segments.len() + sections.len() + 1);
        for seg in segments {
            let offset = seg.data.start();
            let size = seg.data.final_size();
            section = match class {
                ElfClass::Elf32 => section
                    .D32(seg.p_type)
                    .D32(&offset)
                    .D32(seg.vaddr as u32)
                    .D32(seg.vaddr as u32)
                    .D32(&size)
                    .D32(&size)
                    .D32(4) // p_flags: PF_R
                    .D32(4), // p_align
                ElfClass::Elf64 => section
                    .D32(seg.p_type)
                    .D32(4) // p_flags: PF_R
                    .D64(&offset)
                    .D64(seg.vaddr)
                    .D64(seg.vaddr)
                    .D64(&size)
                    .D64(&size)
                    .D64(4), // p_align
            };
            blobs.push(seg.data);
        }

        let mut section_headers = Section::with_endian(endian).append_repeated(0, class.shdr_size() as usize);
        let user_sections = sections
            .into_iter()
            .zip(name_offsets)
            .map(|(s, name)| (name, s.sh_type, s.data))
            .chain(std::iter::once((shstrtab_name, SHT_STRTAB, shstrtab)));
        for (name, sh_type, data) in user_sections {
            let offset = data.start();
            let size = data.final_size();
            section_headers = match class {
                ElfClass::Elf32 => section_headers
                    .D32(name)
                    .D32(sh_type)
                    .D32(0) // sh_flags
                    .D32(0) // sh_addr
                    .D32(&offset)
                    .D32(&size)
                    .D32(0) // sh_link
                    .D32(0) // sh_info
                    .D32(1) // sh_addralign
                    .D32(0), // sh_entsize
                ElfClass::Elf64 => section_headers
                    .D32(name)
                    .D32(sh_type)
                    .D64(0)
                    .D64(0)
                    .D64(&offset)
                    .D64(&size)
                    .D32(0)
                    .D32(0)
                    .D64(1)
                    .D64(0),
            };
            blobs.push(data);
        }

        for blob in blobs {
            let offset = blob.start();
            section = section.align(4).mark(&offset).append_section(blob);
        }

        section
            .align(8)
            .mark(&shoff)
            .append_section(section_headers)
            .get_contents()
    }
}

/// A sequence of ELF notes, usable as the contents of a `PT_NOTE` segment or
/// a `SHT_NOTE` section.
pub struct Notes {
    section: Section,
}

impl Notes {
    pub fn new(endian: Endian) -> Notes {
        Notes {
            section: Section::with_endian(endian),
        }
    }

    /// Append a well formed note. `name` gets a NUL terminator, name and
    /// description are padded to 4 bytes.
    pub fn add_note<T: Into<Section>>(self, n_type: u32, name: &str, desc: T) -> Notes {
        let desc = desc.into();
        let desc_size = desc.size();
        let section = self
            .section
            .D32(name.len() as u32 + 1)
            .D32(desc_size as u32)
            .D32(n_type)
            .append_bytes(name.as_bytes())
            .D8(0)
            .align(4)
            .append_section(desc)
            .align(4);
        Notes { section }
    }

    /// Append a note whose description is `desc`.
    pub fn add_note_bytes(self, n_type: u32, name: &str, desc: &[u8]) -> Notes {
        let endian = self.section.endian;
        self.add_note(n_type, name, bytes_section(endian, desc))
    }

    /// Append a note header with arbitrary sizes followed by `payload`, without
    /// any padding. Used to build malformed note streams.
    pub fn add_raw(self, namesz: u32, descsz: u32, n_type: u32, payload: &[u8]) -> Notes {
        let section = self
            .section
            .D32(namesz)
            .D32(descsz)
            .D32(n_type)
            .append_bytes(payload);
        Notes { section }
    }
}

impl From<Notes> for Section {
    fn from(notes: Notes) -> Self {
        notes.section
    }
}

/// An `NT_GNU_BUILD_ID` note holding `build_id`.
pub fn build_id_note(endian: Endian, build_id: &[u8]) -> Notes {
    Notes::new(endian).add_note_bytes(NT_GNU_BUILD_ID, "GNU", build_id)
}

/// The description of an `NT_PRSTATUS` note (the kernel's `elf_prstatus`).
///
/// The number of registers in `regs` determines the architecture, see the
/// `*_GREG_COUNT` constants. Registers are truncated to the class word size.
pub struct PrStatus {
    pub class: ElfClass,
    pub endian: Endian,
    pub signo: u32,
    pub code: u32,
    pub errno: u32,
    pub cursig: u16,
    pub pid: u32,
    pub ppid: u32,
    pub pgrp: u32,
    pub sid: u32,
    pub regs: Vec<u64>,
}

impl PrStatus {
    pub fn new(class: ElfClass, endian: Endian, pid: u32, regs: Vec<u64>) -> PrStatus {
        PrStatus {
            class,
            endian,
            signo: 0,
            code: 0,
            errno: 0,
            cursig: 0,
            pid,
            ppid: 0,
            pgrp: 0,
            sid: 0,
            regs,
        }
    }

    pub fn signal(mut self, signo: u32) -> PrStatus {
        self.signo = signo;
        self.cursig = signo as u16;
        self
    }

    pub fn ppid(mut self, ppid: u32) -> PrStatus {
        self.ppid = ppid;
        self
    }

    pub fn pgrp(mut self, pgrp: u32) -> PrStatus {
        self.pgrp = pgrp;
        self
    }
}

impl From<PrStatus> for Section {
    fn from(status: PrStatus) -> Self {
        let PrStatus {
            class,
            endian,
            signo,
            code,
            errno,
            cursig,
            pid,
            ppid,
            pgrp,
            sid,
            regs,
        } = status;
        let section = Section::with_endian(endian)
            .D32(signo)
            .D32(code)
            .D32(errno)
            .D16(cursig)
            .D16(0);
        // pr_sigpend, pr_sighold
        let section = word(word(section, class, 0), class, 0)
            .D32(pid)
            .D32(ppid)
            .D32(pgrp)
            .D32(sid);
        // pr_utime, pr_stime, pr_cutime, pr_cstime
        let mut section = section.append_repeated(0, 8 * class.word_size() as usize);
        for reg in regs {
            section = word(section, class, reg);
        }
        // pr_fpvalid
        let section = section.D32(0);
        match class {
            ElfClass::Elf32 => section,
            ElfClass::Elf64 => section.D32(0),
        }
    }
}

/// The description of an `NT_SIGINFO` note (the kernel's `siginfo_t`).
pub struct SigInfo {
    pub class: ElfClass,
    pub endian: Endian,
    pub signo: u32,
    pub errno: u32,
    pub code: u32,
    pub addr: u64,
}

impl From<SigInfo> for Section {
    fn from(info: SigInfo) -> Self {
        let section = Section::with_endian(info.endian)
            .D32(info.signo)
            .D32(info.errno)
            .D32(info.code);
        let section = match info.class {
            ElfClass::Elf32 => section.D32(info.addr as u32),
            ElfClass::Elf64 => section.D32(0).D64(info.addr),
        };
        let remaining = SIGINFO_SIZE - section.size() as usize;
        section.append_repeated(0, remaining)
    }
}

/// An auxiliary vector, terminated by `AT_NULL` when finished.
pub struct Auxv {
    class: ElfClass,
    section: Section,
}

impl Auxv {
    pub fn new(class: ElfClass, endian: Endian) -> Auxv {
        Auxv {
            class,
            section: Section::with_endian(endian),
        }
    }

    pub fn entry(self, a_type: u64, value: u64) -> Auxv {
        let section = word(word(self.section, self.class, a_type), self.class, value);
        Auxv {
            class: self.class,
            section,
        }
    }
}

impl From<Auxv> for Section {
    fn from(auxv: Auxv) -> Self {
        word(word(auxv.section, auxv.class, AT_NULL), auxv.class, 0)
    }
}

/// A writer of synthetic ELF core files.
pub struct SynthCore {
    elf: SynthElf,
}

impl SynthCore {
    pub fn new(class: ElfClass, endian: Endian, machine: u16) -> SynthCore {
        SynthCore {
            elf: SynthElf::new(class, endian).elf_type(ET_CORE).machine(machine),
        }
    }

    pub fn class(&self) -> ElfClass {
        self.elf.class()
    }

    pub fn endian(&self) -> Endian {
        self.elf.endian()
    }

    /// Add a `PT_NOTE` segment holding `notes`.
    pub fn add_notes(self, notes: Notes) -> SynthCore {
        SynthCore {
            elf: self.elf.add_segment(PT_NOTE, 0, notes),
        }
    }

    /// Add a `PT_LOAD` segment holding `data` at virtual address `vaddr`.
    pub fn add_memory(self, vaddr: u64, data: &[u8]) -> SynthCore {
        let endian = self.elf.endian();
        SynthCore {
            elf: self
                .elf
                .add_segment(PT_LOAD, vaddr, bytes_section(endian, data)),
        }
    }

    pub fn finish(self) -> Option<Vec<u8>> {
        self.elf.finish()
    }
}

#[test]
fn test_empty_elf64() {
    let contents = SynthElf::new(ElfClass::Elf64, Endian::Little)
        .finish()
        .unwrap();
    // header (64) + ".shstrtab" string table (11) + padding to 80 + 2 section headers
    assert_eq!(contents.len(), 80 + 2 * 64);
    assert_eq!(&contents[..8], &[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    // e_phoff
    assert_eq!(&contents[0x20..0x28], &[0; 8]);
    // e_shoff
    assert_eq!(&contents[0x28..0x30], &[80, 0, 0, 0, 0, 0, 0, 0]);
    // e_shnum, e_shstrndx
    assert_eq!(&contents[0x3c..0x40], &[2, 0, 1, 0]);
}

#[test]
fn test_empty_elf32_bigendian() {
    let contents = SynthElf::new(ElfClass::Elf32, Endian::Big)
        .elf_type(ET_DYN)
        .finish()
        .unwrap();
    assert_eq!(&contents[..6], &[0x7f, b'E', b'L', b'F', 1, 2]);
    // e_type
    assert_eq!(&contents[0x10..0x12], &[0, 3]);
    // header (52) + ".shstrtab" string table (11) at 52, padded to 64
    assert_eq!(&contents[0x20..0x24], &[0, 0, 0, 64]);
    assert_eq!(contents.len(), 64 + 2 * 40);
}

#[test]
fn test_note_padding() {
    let notes: Section = Notes::new(Endian::Little)
        .add_note_bytes(NT_GNU_BUILD_ID, "GNU", &[1, 2, 3, 4, 5])
        .into();
    assert_eq!(
        notes.get_contents().unwrap(),
        vec![
            4, 0, 0, 0, // namesz
            5, 0, 0, 0, // descsz
            3, 0, 0, 0, // type
            b'G', b'N', b'U', 0, // name
            1, 2, 3, 4, 5, 0, 0, 0, // desc, padded
        ]
    );
}

#[test]
fn test_prstatus_sizes() {
    let size = |class, count| {
        let section: Section = PrStatus::new(class, Endian::Little, 1, vec![0; count]).into();
        section.size()
    };
    assert_eq!(size(ElfClass::Elf32, X86_GREG_COUNT), 144);
    assert_eq!(size(ElfClass::Elf64, AMD64_GREG_COUNT), 336);
    assert_eq!(size(ElfClass::Elf32, ARM_GREG_COUNT), 148);
    assert_eq!(size(ElfClass::Elf64, ARM64_GREG_COUNT), 392);
    assert_eq!(size(ElfClass::Elf32, MIPS_GREG_COUNT), 256);
    assert_eq!(size(ElfClass::Elf64, MIPS_GREG_COUNT), 480);
}
