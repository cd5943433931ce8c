// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::convert::TryFrom;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use scroll::Endian;
use tracing::warn;

use crate::context::Cpu;
use crate::elf::{self, ElfClass, ElfHeader, ProgramHeader, ET_CORE, PT_LOAD, PT_NOTE};
use crate::errors::CoreError;

/// An ELF core file.
///
/// The data is typically a memory-mapped file (see [`CoreFile::open`]), but
/// anything that derefs to bytes works.
#[derive(Debug)]
pub struct CoreFile<T>
where
    T: Deref<Target = [u8]>,
{
    data: T,
    header: ElfHeader,
    cpu: Cpu,
}

impl CoreFile<Mmap> {
    /// Map the core file at `path` and validate its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<CoreFile<Mmap>, CoreError> {
        let file = File::open(path.as_ref()).map_err(|e| {
            warn!("failed to open core file {}: {}", path.as_ref().display(), e);
            CoreError::CoreUnreadable
        })?;
        let mmap = unsafe { Mmap::map(&file).map_err(|_| CoreError::CoreUnreadable)? };
        CoreFile::from_data(mmap)
    }
}

impl<T> CoreFile<T>
where
    T: Deref<Target = [u8]>,
{
    /// Validate `data` as a core file of a supported architecture.
    pub fn from_data(data: T) -> Result<CoreFile<T>, CoreError> {
        if !elf::is_valid_elf(&data) {
            return Err(CoreError::NotElf);
        }
        let header = ElfHeader::parse(&data).ok_or(CoreError::NotElf)?;
        if header.e_type != ET_CORE {
            return Err(CoreError::NotCore(header.e_type));
        }
        let cpu = Cpu::from_elf(header.e_machine, header.class)
            .ok_or(CoreError::UnsupportedArchitecture(header.e_machine))?;
        Ok(CoreFile { data, header, cpu })
    }

    pub fn cpu(&self) -> Cpu {
        self.cpu
    }

    pub fn class(&self) -> ElfClass {
        self.header.class
    }

    pub fn endian(&self) -> Endian {
        self.header.endian
    }

    pub fn program_headers(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
        self.header.program_headers(&self.data)
    }

    /// The contents of the first `PT_NOTE` segment.
    ///
    /// A segment that runs past the end of the file is cut short.
    pub fn notes(&self) -> Result<&[u8], CoreError> {
        let (offset, size) =
            elf::find_segment(&self.data, PT_NOTE).ok_or(CoreError::MissingNotes)?;
        let start = usize::try_from(offset).map_err(|_| CoreError::MissingNotes)?;
        let rest = self.data.get(start..).ok_or(CoreError::MissingNotes)?;
        let len = usize::try_from(size).unwrap_or(usize::MAX).min(rest.len());
        Ok(&rest[..len])
    }

    /// Read `length` bytes of the crashed process's memory at `address`.
    ///
    /// The first `PT_LOAD` segment whose file-backed range contains `address`
    /// and whose data holds the whole read is used.
    pub fn copy_data(&self, address: u64, length: usize) -> Option<&[u8]> {
        self.program_headers()
            .filter(|segment| segment.p_type == PT_LOAD)
            .filter(|segment| {
                address >= segment.p_vaddr && address - segment.p_vaddr < segment.p_filesz
            })
            .find_map(|segment| {
                let offset = segment.p_offset.checked_add(address - segment.p_vaddr)?;
                elf::slice_at(&self.data, offset, length as u64)
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryInto;

    use minidump_dumper_synth::{self as synth, Notes, SynthCore, SynthElf};
    use test_assembler::Endian as SynthEndian;

    fn core() -> Vec<u8> {
        SynthCore::new(synth::ElfClass::Elf64, SynthEndian::Little, synth::EM_X86_64)
            .add_notes(Notes::new(SynthEndian::Little).add_note_bytes(1, "CORE", &[1; 4]))
            .add_memory(0x1000, &[0xaa; 0x100])
            .add_memory(0x2000, &[0xbb; 0x10])
            .finish()
            .unwrap()
    }

    #[test]
    fn test_validation() {
        let core = CoreFile::from_data(core()).unwrap();
        assert_eq!(core.cpu(), Cpu::X86_64);
        assert_eq!(core.class(), ElfClass::Elf64);
        assert_eq!(core.endian(), Endian::Little);

        assert_eq!(
            CoreFile::from_data(b"nope".to_vec()).unwrap_err(),
            CoreError::NotElf
        );
        let exe = SynthElf::new(synth::ElfClass::Elf64, SynthEndian::Little)
            .finish()
            .unwrap();
        assert_eq!(CoreFile::from_data(exe).unwrap_err(), CoreError::NotCore(2));
        let ppc = SynthCore::new(synth::ElfClass::Elf32, SynthEndian::Big, 20)
            .finish()
            .unwrap();
        assert_eq!(
            CoreFile::from_data(ppc).unwrap_err(),
            CoreError::UnsupportedArchitecture(20)
        );
    }

    #[test]
    fn test_notes() {
        let core = CoreFile::from_data(core()).unwrap();
        assert_eq!(core.notes().unwrap().len(), 12 + 8 + 4);

        let no_notes = SynthCore::new(synth::ElfClass::Elf32, SynthEndian::Little, synth::EM_386)
            .add_memory(0x1000, &[0; 4])
            .finish()
            .unwrap();
        let core = CoreFile::from_data(no_notes).unwrap();
        assert_eq!(core.notes().unwrap_err(), CoreError::MissingNotes);
    }

    #[test]
    fn test_notes_clamped_to_file() {
        let mut data = core();
        let read_u64 = |data: &[u8], at: usize| {
            u64::from_le_bytes(data[at..at + 8].try_into().unwrap()) as usize
        };
        let phoff = read_u64(&data, 0x20);
        let offset = read_u64(&data, phoff + 8);
        // p_filesz of the first program header, the PT_NOTE segment.
        let filesz = phoff + 32;
        data[filesz..filesz + 8].copy_from_slice(&0x10_0000u64.to_le_bytes());
        let len = data.len();

        let core = CoreFile::from_data(data).unwrap();
        let notes = core.notes().unwrap();
        assert_eq!(notes.len(), len - offset);
        assert_eq!(&notes[..4], &[5, 0, 0, 0]);
    }

    #[test]
    fn test_copy_data() {
        let core = CoreFile::from_data(core()).unwrap();
        assert_eq!(core.copy_data(0x1000, 4), Some(&[0xaa; 4][..]));
        assert_eq!(core.copy_data(0x10fc, 4), Some(&[0xaa; 4][..]));
        assert_eq!(core.copy_data(0x2008, 8), Some(&[0xbb; 8][..]));
        // Unmapped.
        assert_eq!(core.copy_data(0x0fff, 1), None);
        assert_eq!(core.copy_data(0x1100, 1), None);
        assert_eq!(core.copy_data(0x3000, 1), None);
        // Past the end of the file.
        assert_eq!(core.copy_data(0x2008, 0x100), None);
    }
}
