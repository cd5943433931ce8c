// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Locating sections, segments and notes inside ELF images.
//!
//! Everything here works on a byte slice holding (at least the beginning of)
//! an ELF image. Both ELF classes and both byte orders are supported; every
//! read is bounds-checked, so a malformed table yields `None` rather than a
//! read past the end of the image.

use std::convert::TryFrom;

use scroll::ctx::SizeWith;
use scroll::{Endian, Pread};

pub const ELFMAG: &[u8; 4] = b"\x7fELF";
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;

pub const ET_CORE: u16 = 4;

pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_NOTE: u32 = 7;

pub const NT_PRSTATUS: u32 = 1;
pub const NT_FPREGSET: u32 = 2;
pub const NT_GNU_BUILD_ID: u32 = 3;
pub const NT_SIGINFO: u32 = 0x5349_4749;
pub const NT_PRXFPREG: u32 = 0x46e6_2b7f;

/// The class (word size) of an ELF image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    /// The class of the running process.
    pub fn native() -> ElfClass {
        if cfg!(target_pointer_width = "64") {
            ElfClass::Elf64
        } else {
            ElfClass::Elf32
        }
    }

    /// The size in bytes of an address.
    pub fn word_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    /// Read one address-sized word at `offset`, advancing it.
    pub fn read_word(self, bytes: &[u8], offset: &mut usize, endian: Endian) -> Option<u64> {
        match self {
            ElfClass::Elf32 => bytes.gread_with::<u32>(offset, endian).ok().map(u64::from),
            ElfClass::Elf64 => bytes.gread_with::<u64>(offset, endian).ok(),
        }
    }
}

/// Raw ELF32 file header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// Raw ELF64 file header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf64Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// Raw ELF32 program header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

/// Raw ELF64 program header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf64ProgramHeader {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Raw ELF32 section header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf32SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

/// Raw ELF64 section header.
#[derive(Clone, Pread, SizeWith)]
pub struct Elf64SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// The fields of an ELF file header that are needed here, widened to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endian: Endian,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_phnum: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// A program header, widened to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
}

/// A section header, widened to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_offset: u64,
    pub sh_size: u64,
}

/// Returns true if `image` starts with the ELF magic.
///
/// This is the only check made before handing an image to the other
/// functions in this module.
pub fn is_valid_elf(image: &[u8]) -> bool {
    image.starts_with(ELFMAG)
}

/// The byte slice `[offset, offset + size)` of `data`, if it's all there.
pub(crate) fn slice_at(data: &[u8], offset: u64, size: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    data.get(start..end)
}

impl ElfHeader {
    /// Read the file header of `image`.
    ///
    /// Fails for a bad magic, an unknown class or byte order, or a truncated
    /// header.
    pub fn parse(image: &[u8]) -> Option<ElfHeader> {
        if !is_valid_elf(image) {
            return None;
        }
        let endian = match *image.get(EI_DATA)? {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            _ => return None,
        };
        match *image.get(EI_CLASS)? {
            ELFCLASS32 => {
                let raw: Elf32Header = image.pread_with(0, endian).ok()?;
                Some(ElfHeader {
                    class: ElfClass::Elf32,
                    endian,
                    e_type: raw.e_type,
                    e_machine: raw.e_machine,
                    e_entry: raw.e_entry.into(),
                    e_phoff: raw.e_phoff.into(),
                    e_shoff: raw.e_shoff.into(),
                    e_phnum: raw.e_phnum,
                    e_shnum: raw.e_shnum,
                    e_shstrndx: raw.e_shstrndx,
                })
            }
            ELFCLASS64 => {
                let raw: Elf64Header = image.pread_with(0, endian).ok()?;
                Some(ElfHeader {
                    class: ElfClass::Elf64,
                    endian,
                    e_type: raw.e_type,
                    e_machine: raw.e_machine,
                    e_entry: raw.e_entry,
                    e_phoff: raw.e_phoff,
                    e_shoff: raw.e_shoff,
                    e_phnum: raw.e_phnum,
                    e_shnum: raw.e_shnum,
                    e_shstrndx: raw.e_shstrndx,
                })
            }
            _ => None,
        }
    }

    fn table_offset(&self, table: u64, entry_size: usize, index: usize) -> Option<usize> {
        let table = usize::try_from(table).ok()?;
        table.checked_add(entry_size.checked_mul(index)?)
    }

    /// The program header at `index`, if it lies inside `image`.
    pub fn program_header(&self, image: &[u8], index: usize) -> Option<ProgramHeader> {
        match self.class {
            ElfClass::Elf32 => {
                let size = Elf32ProgramHeader::size_with(&self.endian);
                let offset = self.table_offset(self.e_phoff, size, index)?;
                let raw: Elf32ProgramHeader = image.pread_with(offset, self.endian).ok()?;
                Some(ProgramHeader {
                    p_type: raw.p_type,
                    p_offset: raw.p_offset.into(),
                    p_vaddr: raw.p_vaddr.into(),
                    p_filesz: raw.p_filesz.into(),
                })
            }
            ElfClass::Elf64 => {
                let size = Elf64ProgramHeader::size_with(&self.endian);
                let offset = self.table_offset(self.e_phoff, size, index)?;
                let raw: Elf64ProgramHeader = image.pread_with(offset, self.endian).ok()?;
                Some(ProgramHeader {
                    p_type: raw.p_type,
                    p_offset: raw.p_offset,
                    p_vaddr: raw.p_vaddr,
                    p_filesz: raw.p_filesz,
                })
            }
        }
    }

    /// The section header at `index`, if it lies inside `image`.
    pub fn section_header(&self, image: &[u8], index: usize) -> Option<SectionHeader> {
        match self.class {
            ElfClass::Elf32 => {
                let size = Elf32SectionHeader::size_with(&self.endian);
                let offset = self.table_offset(self.e_shoff, size, index)?;
                let raw: Elf32SectionHeader = image.pread_with(offset, self.endian).ok()?;
                Some(SectionHeader {
                    sh_name: raw.sh_name,
                    sh_type: raw.sh_type,
                    sh_offset: raw.sh_offset.into(),
                    sh_size: raw.sh_size.into(),
                })
            }
            ElfClass::Elf64 => {
                let size = Elf64SectionHeader::size_with(&self.endian);
                let offset = self.table_offset(self.e_shoff, size, index)?;
                let raw: Elf64SectionHeader = image.pread_with(offset, self.endian).ok()?;
                Some(SectionHeader {
                    sh_name: raw.sh_name,
                    sh_type: raw.sh_type,
                    sh_offset: raw.sh_offset,
                    sh_size: raw.sh_size,
                })
            }
        }
    }

    /// All readable program headers, in table order.
    pub fn program_headers<'a>(
        &'a self,
        image: &'a [u8],
    ) -> impl Iterator<Item = ProgramHeader> + 'a {
        (0..self.e_phnum as usize).filter_map(move |i| self.program_header(image, i))
    }
}

/// Find the first section named `name` with type `sh_type`.
///
/// Returns the section's file offset and size. A section with a zero size
/// counts as not found.
pub fn find_section(image: &[u8], name: &str, sh_type: u32) -> Option<(u64, u64)> {
    let header = ElfHeader::parse(image)?;
    let strtab = header.section_header(image, header.e_shstrndx as usize)?;
    let names = slice_at(image, strtab.sh_offset, strtab.sh_size)?;

    let section = (0..header.e_shnum as usize)
        .filter_map(|i| header.section_header(image, i))
        .find(|section| {
            if section.sh_type != sh_type {
                return false;
            }
            // The name and its terminator have to fit inside the string table.
            let start = section.sh_name as usize;
            match names.get(start..start.saturating_add(name.len() + 1)) {
                Some(candidate) => {
                    &candidate[..name.len()] == name.as_bytes() && candidate[name.len()] == 0
                }
                None => false,
            }
        })?;
    if section.sh_size == 0 {
        return None;
    }
    Some((section.sh_offset, section.sh_size))
}

/// Find the first segment with type `p_type`.
///
/// Returns the segment's file offset and size (`p_filesz`). A segment with a
/// zero size counts as not found.
pub fn find_segment(image: &[u8], p_type: u32) -> Option<(u64, u64)> {
    let header = ElfHeader::parse(image)?;
    let segment = header
        .program_headers(image)
        .find(|segment| segment.p_type == p_type)?;
    if segment.p_filesz == 0 {
        return None;
    }
    Some((segment.p_offset, segment.p_filesz))
}

/// The contents of the section found by [`find_section`], if they lie inside `image`.
pub fn section_data<'a>(image: &'a [u8], name: &str, sh_type: u32) -> Option<&'a [u8]> {
    let (offset, size) = find_section(image, name, sh_type)?;
    slice_at(image, offset, size)
}

/// The contents of the segment found by [`find_segment`], if they lie inside `image`.
pub fn segment_data(image: &[u8], p_type: u32) -> Option<&[u8]> {
    let (offset, size) = find_segment(image, p_type)?;
    slice_at(image, offset, size)
}

const NOTE_HEADER_SIZE: usize = 12;

fn align4(value: usize) -> Option<usize> {
    value.checked_add(3).map(|v| v & !3)
}

/// A single ELF note.
///
/// `name` excludes the terminating NUL. A name or description that doesn't
/// fit inside the note region is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElfNote<'a> {
    pub n_type: u32,
    pub namesz: u32,
    pub descsz: u32,
    pub name: &'a [u8],
    pub desc: &'a [u8],
}

/// An iterator over the notes of a note region.
///
/// Iteration ends as soon as a note header doesn't fit inside the region.
pub struct NoteIter<'a> {
    data: &'a [u8],
    offset: usize,
    endian: Endian,
}

impl<'a> NoteIter<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> NoteIter<'a> {
        NoteIter {
            data,
            offset: 0,
            endian,
        }
    }
}

impl<'a> Iterator for NoteIter<'a> {
    type Item = ElfNote<'a>;

    fn next(&mut self) -> Option<ElfNote<'a>> {
        let start = self.offset;
        if self.data.len().saturating_sub(start) < NOTE_HEADER_SIZE {
            return None;
        }
        let mut offset = start;
        let namesz: u32 = self.data.gread_with(&mut offset, self.endian).ok()?;
        let descsz: u32 = self.data.gread_with(&mut offset, self.endian).ok()?;
        let n_type: u32 = self.data.gread_with(&mut offset, self.endian).ok()?;

        let name_start = offset;
        let name = slice_at(self.data, name_start as u64, namesz.into())
            .map(|name| &name[..name.len().saturating_sub(1)])
            .unwrap_or(&[]);

        let desc_start = align4(name_start.saturating_add(namesz as usize));
        let desc = desc_start
            .and_then(|desc_start| slice_at(self.data, desc_start as u64, descsz.into()))
            .unwrap_or(&[]);

        // Anything that overflows ends the walk.
        self.offset = desc_start
            .and_then(|desc_start| desc_start.checked_add(descsz as usize))
            .and_then(align4)
            .unwrap_or(usize::MAX);

        Some(ElfNote {
            n_type,
            namesz,
            descsz,
            name,
            desc,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use minidump_dumper_synth::{self as synth, Notes, SynthElf};
    use test_assembler::Endian as SynthEndian;

    fn image(class: synth::ElfClass, endian: SynthEndian) -> Vec<u8> {
        SynthElf::new(class, endian)
            .add_segment(synth::PT_LOAD, 0x1000, synth::bytes_section(endian, &[0; 16]))
            .add_segment(
                synth::PT_NOTE,
                0,
                synth::build_id_note(endian, &[0xab; 20]),
            )
            .add_section(".text", synth::SHT_PROGBITS, synth::bytes_section(endian, &[1; 24]))
            .add_section(".data", synth::SHT_PROGBITS, synth::bytes_section(endian, &[2; 8]))
            .add_section(".empty", synth::SHT_PROGBITS, synth::bytes_section(endian, &[]))
            .finish()
            .unwrap()
    }

    #[test]
    fn test_is_valid_elf() {
        assert!(is_valid_elf(b"\x7fELF"));
        assert!(is_valid_elf(b"\x7fELF\x02\x01"));
        assert!(!is_valid_elf(b"\x7fEL"));
        assert!(!is_valid_elf(b"MZ\x90\x00"));
        assert!(!is_valid_elf(&[]));
    }

    #[test]
    fn test_find_section_all_layouts() {
        let mut results = Vec::new();
        for &class in &[synth::ElfClass::Elf32, synth::ElfClass::Elf64] {
            for &endian in &[SynthEndian::Little, SynthEndian::Big] {
                let image = image(class, endian);
                let text = find_section(&image, ".text", SHT_PROGBITS).unwrap();
                assert_eq!(text.1, 24);
                assert_eq!(section_data(&image, ".text", SHT_PROGBITS), Some(&[1u8; 24][..]));
                assert_eq!(section_data(&image, ".data", SHT_PROGBITS), Some(&[2u8; 8][..]));
                // Wrong type, missing, and empty sections are all absent.
                assert_eq!(find_section(&image, ".text", SHT_NOTE), None);
                assert_eq!(find_section(&image, ".bss", SHT_PROGBITS), None);
                assert_eq!(find_section(&image, ".empty", SHT_PROGBITS), None);
                // A prefix of a section name doesn't match.
                assert_eq!(find_section(&image, ".tex", SHT_PROGBITS), None);

                let note = find_segment(&image, PT_NOTE).unwrap();
                assert_eq!(note.1, 12 + 4 + 20);
                assert_eq!(find_segment(&image, 6), None);
                results.push((class.word_size(), text, note));
            }
        }
        // Identical layouts give identical answers regardless of byte order.
        assert_eq!(results[0], results[1]);
        assert_eq!(results[2], results[3]);
    }

    #[test]
    fn test_section_name_out_of_bounds() {
        let endian = SynthEndian::Little;
        let image = SynthElf::new(synth::ElfClass::Elf64, endian)
            .add_section_with_name_offset(
                0xffff_fff0,
                synth::SHT_PROGBITS,
                synth::bytes_section(endian, &[1; 8]),
            )
            .finish()
            .unwrap();
        assert_eq!(find_section(&image, ".text", SHT_PROGBITS), None);
        assert_eq!(find_section(&image, "", SHT_PROGBITS), None);
    }

    #[test]
    fn test_bad_string_table_index() {
        let endian = SynthEndian::Little;
        let image = SynthElf::new(synth::ElfClass::Elf32, endian)
            .add_section(".text", synth::SHT_PROGBITS, synth::bytes_section(endian, &[1; 8]))
            .shstrndx(100)
            .finish()
            .unwrap();
        assert_eq!(find_section(&image, ".text", SHT_PROGBITS), None);
    }

    #[test]
    fn test_truncated_headers() {
        let image = image(synth::ElfClass::Elf64, SynthEndian::Little);
        // Header only, tables cut off.
        assert_eq!(find_section(&image[..64], ".text", SHT_PROGBITS), None);
        assert_eq!(find_segment(&image[..64], PT_NOTE), None);
        assert!(ElfHeader::parse(&image[..40]).is_none());
        // Unknown class.
        let mut bad = image.clone();
        bad[EI_CLASS] = 7;
        assert!(ElfHeader::parse(&bad).is_none());
    }

    #[test]
    fn test_note_iter() {
        let notes: test_assembler::Section = Notes::new(SynthEndian::Big)
            .add_note_bytes(1, "CORE", &[1, 2, 3])
            .add_note_bytes(0x1234, "LINUX", &[4; 8])
            .into();
        let data = notes.get_contents().unwrap();
        let notes: Vec<_> = NoteIter::new(&data, Endian::Big).collect();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].n_type, 1);
        assert_eq!(notes[0].name, b"CORE");
        assert_eq!(notes[0].desc, &[1, 2, 3]);
        assert_eq!(notes[1].n_type, 0x1234);
        assert_eq!(notes[1].name, b"LINUX");
        assert_eq!(notes[1].desc, &[4; 8]);
    }

    #[test]
    fn test_note_iter_overrun() {
        // descsz claims far more data than the region holds.
        let notes: test_assembler::Section = Notes::new(SynthEndian::Little)
            .add_raw(4, 0x1000, 3, b"GNU\0\x01\x02")
            .into();
        let data = notes.get_contents().unwrap();
        let notes: Vec<_> = NoteIter::new(&data, Endian::Little).collect();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].name, b"GNU");
        assert!(notes[0].desc.is_empty());

        // A partial header is not a note.
        assert_eq!(NoteIter::new(&data[..8], Endian::Little).count(), 0);

        // Huge sizes don't wrap around.
        let notes: test_assembler::Section = Notes::new(SynthEndian::Little)
            .add_raw(u32::MAX, u32::MAX, 3, &[])
            .into();
        let data = notes.get_contents().unwrap();
        let notes: Vec<_> = NoteIter::new(&data, Endian::Little).collect();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].name.is_empty());
        assert!(notes[0].desc.is_empty());
    }
}
